use std::{
    future::Future,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use reqwest::Url;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use tokio_retry::{strategy::FixedInterval, RetryIf};
use tokio_util::sync::CancellationToken;

use crate::{
    config::CaptureConfig,
    hls,
    stats::CaptureStatistics,
    util::{self, DownloadError},
};

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("playlist unreachable after {attempts} attempts")]
    ManifestUnreachable {
        attempts: usize,
        #[source]
        source: DownloadError,
    },
    #[error("could not download playlist")]
    PlaylistError(#[source] DownloadError),
    #[error("no chunklist in playlist")]
    NoChunklist,
    #[error("could not download chunklist")]
    ChunklistError(#[source] DownloadError),
    #[error("invalid URL")]
    InvalidUrl(#[from] url::ParseError),
    #[error("{0} broken chunks")]
    TooManyBrokenChunks(u64),
    #[error("I/O error")]
    IoError(#[from] std::io::Error),
    #[error("cancelled")]
    Cancelled,
}

/// Everything one capture run needs.
pub struct CaptureJob<'a> {
    pub name: &'a str,
    pub client: &'a util::HttpClient,
    pub config: &'a CaptureConfig,
    pub stats: &'a CaptureStatistics,
    pub output: PathBuf,
    pub cancel: CancellationToken,
}

async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, CaptureError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CaptureError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Fetches the top-level playlist, retrying only on HTTP status failures.
pub async fn load_playlist(
    client: &util::HttpClient,
    url: &Url,
    config: &CaptureConfig,
    name: &str,
) -> Result<String, CaptureError> {
    let attempts = config.max_manifest_attempts.max(1);
    let strategy = FixedInterval::new(config.manifest_retry_delay).take(attempts - 1);

    let fetch = move || async move {
        client.fetch_text(url.as_str()).await.map_err(|e| {
            if let Some(status) = e.status() {
                warn!("{}: Cannot load playlist {}, HTTP status: {}", name, url, status);
            }
            e
        })
    };

    RetryIf::spawn(strategy, fetch, DownloadError::is_http_status)
        .await
        .map_err(|e| {
            if e.is_http_status() {
                CaptureError::ManifestUnreachable {
                    attempts,
                    source: e,
                }
            } else {
                CaptureError::PlaylistError(e)
            }
        })
}

async fn append_chunk(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.flush().await
}

/// Captures the stream behind `playlist_url` until cancelled or the broken
/// chunk budget runs out. Cancellation is reported as `Ok`.
pub async fn capture_stream(job: CaptureJob<'_>, playlist_url: Url) -> Result<(), CaptureError> {
    match run(&job, playlist_url).await {
        Err(CaptureError::Cancelled) => {
            debug!("{}: capture cancelled", job.name);
            Ok(())
        }
        res => res,
    }
}

async fn run(job: &CaptureJob<'_>, playlist_url: Url) -> Result<(), CaptureError> {
    let CaptureJob {
        name,
        client,
        config,
        stats,
        ..
    } = *job;
    let cancel = &job.cancel;

    let playlist =
        until_cancelled(cancel, load_playlist(client, &playlist_url, config, name)).await??;
    let reference = hls::parse_playlist(&playlist).ok_or(CaptureError::NoChunklist)?;
    let chunklist_url = hls::resolve(&playlist_url, reference)?;
    info!("{}: capturing {} into {}", name, chunklist_url, job.output.display());

    loop {
        let started = Instant::now();
        let text = until_cancelled(cancel, client.fetch_text(chunklist_url.as_str()))
            .await?
            .map_err(|e| {
                match e.status() {
                    Some(status) => warn!("{}: Cannot load chunklist, HTTP status: {}", name, status),
                    None => warn!("{}: Cannot load chunklist: {}", name, e),
                }
                CaptureError::ChunklistError(e)
            })?;
        let chunklist = hls::parse_chunklist(&text);

        let mut seq = stats.sequence_number();
        if seq == 0 {
            seq = chunklist.media_sequence;
        } else if chunklist.media_sequence > seq {
            warn!(
                "{}: chunks {}..{} are no longer listed, skipping ahead",
                name, seq, chunklist.media_sequence
            );
            seq = chunklist.media_sequence;
        }
        stats.set_sequence_number(seq);

        // Everything listed before `seq` has already been appended.
        let skip = (seq - chunklist.media_sequence) as usize;
        let pending = (chunklist.media_sequence..)
            .zip(chunklist.chunks.iter())
            .skip(skip);

        for (index, chunk) in pending {
            let chunk_url = hls::resolve(&chunklist_url, chunk)?;
            match until_cancelled(cancel, client.fetch_bytes(chunk_url.as_str())).await? {
                Ok(data) if !data.is_empty() => {
                    append_chunk(&job.output, &data).await?;
                    stats.record_chunk(index, data.len());
                    trace!("{}: appended chunk {} ({} bytes)", name, index, data.len());
                    continue;
                }
                Ok(_) => warn!("{}: Empty video chunk {}", name, chunk),
                Err(e) => match e.status() {
                    Some(status) => {
                        warn!("{}: Cannot load video chunk, HTTP status: {}", name, status)
                    }
                    None => warn!("{}: Cannot load video chunk: {}", name, e),
                },
            }

            let broken = stats.record_broken();
            if broken >= config.max_broken_chunks as u64 {
                return Err(CaptureError::TooManyBrokenChunks(broken));
            }
        }

        let delay = poll_delay(chunklist.total_duration, started.elapsed(), config);
        if !delay.is_zero() {
            until_cancelled(cancel, tokio::time::sleep(delay)).await?;
        }
    }
}

/// Waits a quarter of the listed duration if the poll took less than half of
/// it, otherwise polls again right away.
fn poll_delay(total_duration: f64, elapsed: Duration, config: &CaptureConfig) -> Duration {
    let total = Duration::try_from_secs_f64(total_duration).unwrap_or_default();
    if total.is_zero() {
        config.min_poll_interval
    } else if elapsed < total / 2 {
        total / 4
    } else {
        Duration::ZERO
    }
}
