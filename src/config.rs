use std::{ops::RangeInclusive, path::PathBuf, time::Duration};

pub const REFERER: &str = "https://www.myfreecams.com/";
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/85.0.4183.121 Safari/537.36";

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub referer: String,
    /// Retries handled by the client middleware. The middleware also retries
    /// 5xx, 408 and 429 responses, so anything above zero loosens the capture
    /// retry and broken chunk rules. Zero disables it.
    pub transport_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: USER_AGENT.to_string(),
            referer: REFERER.to_string(),
            transport_retries: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Keepalive frames are sent at an interval drawn uniformly from this range.
    pub keepalive_interval: RangeInclusive<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(10)..=Duration::from_secs(19),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub max_manifest_attempts: usize,
    pub manifest_retry_delay: Duration,
    pub max_broken_chunks: usize,
    /// Used instead of duration based pacing when a chunklist lists no durations.
    pub min_poll_interval: Duration,
    pub output_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_manifest_attempts: 10,
            manifest_retry_delay: Duration::from_millis(500),
            max_broken_chunks: 5,
            min_poll_interval: Duration::from_secs(1),
            output_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http: HttpConfig,
    pub session: SessionConfig,
    pub capture: CaptureConfig,
    pub status_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            session: SessionConfig::default(),
            capture: CaptureConfig::default(),
            status_interval: Duration::from_secs(6),
        }
    }
}
