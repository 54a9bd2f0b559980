use std::sync::atomic::{AtomicU64, Ordering};

use crate::util;

/// Progress counters of one broadcaster's capture.
///
/// One instance per capture. Only the capture task writes them; the owning
/// loader and the status reporter read them.
#[derive(Debug, Default)]
pub struct CaptureStatistics {
    bytes_written: AtomicU64,
    sequence_number: AtomicU64,
    chunks_written: AtomicU64,
    broken_chunks: AtomicU64,
}

impl CaptureStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Index of the next chunk to append. Zero until the first chunklist
    /// has been seen.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number.load(Ordering::Relaxed)
    }

    pub fn set_sequence_number(&self, seq: u64) {
        self.sequence_number.store(seq, Ordering::Relaxed);
    }

    pub fn chunks_written(&self) -> u64 {
        self.chunks_written.load(Ordering::Relaxed)
    }

    pub fn broken_chunks(&self) -> u64 {
        self.broken_chunks.load(Ordering::Relaxed)
    }

    /// Records chunk `index` as appended.
    pub fn record_chunk(&self, index: u64, len: usize) {
        self.bytes_written.fetch_add(len as u64, Ordering::Relaxed);
        self.chunks_written.fetch_add(1, Ordering::Relaxed);
        self.sequence_number.store(index + 1, Ordering::Relaxed);
    }

    /// Counts a broken chunk and returns the new total.
    pub fn record_broken(&self) -> u64 {
        self.broken_chunks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn summary(&self) -> String {
        format!(
            "{} chunks, {}",
            self.chunks_written(),
            util::format_bytes(self.bytes_written())
        )
    }
}
