use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, Local};
use reqwest::Url;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    config::CaptureConfig,
    stats::CaptureStatistics,
    util::{self, HttpClient},
    worker::{self, CaptureJob},
};

struct CaptureTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Capture handle of a single broadcaster.
///
/// The loader lives as long as the broadcaster is tracked and is reused for
/// every capture; each capture writes a new output file.
pub struct StreamLoader {
    name: String,
    client: Arc<HttpClient>,
    config: Arc<CaptureConfig>,
    stats: Arc<CaptureStatistics>,
    output: Option<PathBuf>,
    task: Option<CaptureTask>,
}

pub fn output_filename(name: &str, started: DateTime<Local>) -> String {
    format!("{}_{}.mp4", name, started.format("%Y-%m-%d_%H-%M-%S"))
}

impl StreamLoader {
    pub fn new(name: impl Into<String>, client: Arc<HttpClient>, config: Arc<CaptureConfig>) -> Self {
        Self {
            name: name.into(),
            client,
            config,
            stats: Arc::new(CaptureStatistics::new()),
            output: None,
            task: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Counters of the current or most recent capture.
    pub fn stats(&self) -> &CaptureStatistics {
        &self.stats
    }

    /// File of the running capture, if any.
    pub fn output(&self) -> Option<&PathBuf> {
        self.output.as_ref()
    }

    /// True while a capture task exists and has not finished. Finished tasks
    /// are reaped here.
    pub fn in_progress(&mut self) -> bool {
        match &self.task {
            Some(task) if !task.handle.is_finished() => true,
            Some(_) => {
                self.task = None;
                false
            }
            None => false,
        }
    }

    pub fn status(&self) -> String {
        match &self.output {
            Some(output) => format!(
                "{}: -> {} {}",
                self.name,
                output.display(),
                util::format_bytes(self.stats.bytes_written())
            ),
            None => format!("{}: idle", self.name),
        }
    }

    /// Starts capturing in the background and returns right away. Callers
    /// check [`in_progress`](Self::in_progress) first; a capture that is still
    /// running gets cancelled.
    pub fn start_capture(&mut self, playlist_url: Url) {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
        }

        // A cancelled task may still record its last chunk; it keeps the old
        // counters to itself.
        self.stats = Arc::new(CaptureStatistics::new());
        let output = self
            .config
            .output_dir
            .join(output_filename(&self.name, Local::now()));
        self.output = Some(output.clone());

        let cancel = CancellationToken::new();
        let name = self.name.clone();
        let client = self.client.clone();
        let config = self.config.clone();
        let stats = self.stats.clone();
        let job_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let job = CaptureJob {
                name: &name,
                client: &client,
                config: &config,
                stats: &stats,
                output,
                cancel: job_cancel,
            };
            match worker::capture_stream(job, playlist_url).await {
                Ok(()) => info!("{}: capture stopped ({})", name, stats.summary()),
                Err(e) => warn!("{}: capture ended: {} ({})", name, e, stats.summary()),
            }
        });

        self.task = Some(CaptureTask { cancel, handle });
    }

    /// Cancels the running capture, if any. No chunk is fetched afterwards.
    pub fn stop_capture(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
            info!("{}: stopping capture", self.name);
        }
        self.output = None;
    }

    /// Cancels the running capture and waits for its task to exit.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!("{}: capture task failed: {}", self.name, e);
            }
        }
        self.output = None;
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::Ordering, time::Duration};

    use chrono::TimeZone;

    use super::*;
    use crate::testing::{self, StreamServer};

    fn loader(output_dir: PathBuf) -> StreamLoader {
        StreamLoader::new(
            "alice",
            Arc::new(testing::client()),
            Arc::new(testing::capture_config(output_dir)),
        )
    }

    #[test]
    fn filename_from_name_and_start_time() {
        let started = Local.with_ymd_and_hms(2024, 3, 9, 21, 5, 7).unwrap();
        assert_eq!(
            output_filename("Alice", started),
            "Alice_2024-03-09_21-05-07.mp4"
        );
    }

    #[tokio::test]
    async fn idle_loader() {
        let mut loader = loader(std::env::temp_dir());
        assert!(!loader.in_progress());
        assert_eq!(loader.status(), "alice: idle");
        loader.stop_capture();
        loader.shutdown().await;
        assert!(!loader.in_progress());
    }

    #[tokio::test]
    async fn stop_halts_fetching() {
        let server = StreamServer::start(vec![testing::chunklist(100, 3, 0.1)]).await;
        let dir = tempfile::tempdir().unwrap();
        let mut loader = loader(dir.path().into());

        loader.start_capture(server.playlist_url());
        assert!(loader.in_progress());
        let output = loader.output().cloned().unwrap();
        assert!(output.starts_with(dir.path()));

        let stats = loader.stats.clone();
        assert!(testing::wait_for(move || stats.chunks_written() == 3).await);
        assert!(loader.status().starts_with("alice: -> "));

        loader.stop_capture();
        assert!(!loader.in_progress());
        assert!(loader.output().is_none());
        assert_eq!(loader.status(), "alice: idle");

        tokio::time::sleep(Duration::from_millis(100)).await;
        let chunklists = server.state.chunklist_requests.load(Ordering::SeqCst);
        let chunks = server.state.chunk_requests.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(server.state.chunklist_requests.load(Ordering::SeqCst), chunklists);
        assert_eq!(server.state.chunk_requests.load(Ordering::SeqCst), chunks);

        let expected: String = (100..103).map(testing::chunk_body).collect();
        assert_eq!(std::fs::read_to_string(output).unwrap(), expected);
    }

    #[tokio::test]
    async fn broken_chunks_end_the_capture() {
        let server = StreamServer::start(vec![testing::chunklist(100, 5, 0.1)]).await;
        server.state.chunk_status.store(404, Ordering::SeqCst);
        let dir = tempfile::tempdir().unwrap();
        let mut loader = loader(dir.path().into());

        loader.start_capture(server.playlist_url());
        assert!(loader.in_progress());

        let mut finished = false;
        for _ in 0..250 {
            if !loader.in_progress() {
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(finished);
        assert_eq!(loader.stats().broken_chunks(), 5);
        assert_eq!(server.state.chunk_requests.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn restart_resets_counters() {
        let server = StreamServer::start(vec![testing::chunklist(100, 2, 0.1)]).await;
        let dir = tempfile::tempdir().unwrap();
        let mut loader = loader(dir.path().into());

        loader.start_capture(server.playlist_url());
        let stats = loader.stats.clone();
        assert!(testing::wait_for(move || stats.chunks_written() == 2).await);
        loader.shutdown().await;
        assert_eq!(loader.stats().sequence_number(), 102);

        loader.start_capture(server.playlist_url());
        assert!(loader.in_progress());
        assert_eq!(loader.stats().bytes_written(), 0);
        loader.shutdown().await;
        assert!(!loader.in_progress());
    }

    #[tokio::test]
    async fn late_chunk_of_cancelled_capture_is_not_counted() {
        let server = StreamServer::start(vec![testing::chunklist(100, 2, 0.1)]).await;
        let dir = tempfile::tempdir().unwrap();
        let mut loader = loader(dir.path().into());

        loader.start_capture(server.playlist_url());
        let old_stats = loader.stats.clone();
        loader.stop_capture();

        // live again right away, then the old task finishes its append
        loader.start_capture(server.playlist_url());
        old_stats.record_chunk(500, 4096);

        assert!(!Arc::ptr_eq(&old_stats, &loader.stats));
        assert_ne!(loader.stats().sequence_number(), 501);
        assert!(loader.stats().bytes_written() < 4096);

        let stats = loader.stats.clone();
        assert!(testing::wait_for(move || stats.chunks_written() == 2).await);
        assert_eq!(loader.stats().sequence_number(), 102);
        loader.shutdown().await;
    }
}
