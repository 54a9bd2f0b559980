//! Local HTTP stream server for tests.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use reqwest::Url;

use crate::{
    config::{CaptureConfig, HttpConfig},
    util::HttpClient,
};

pub const PLAYLIST: &str = "#EXTM3U\nchunklist.m3u8\n";

pub struct ServerState {
    pub playlist: Mutex<String>,
    /// Number of upcoming playlist requests answered with 403.
    pub playlist_failures: AtomicUsize,
    pub playlist_requests: AtomicUsize,
    /// Served in order, the last one repeats forever.
    pub chunklists: Vec<String>,
    pub chunklist_status: AtomicU16,
    pub chunklist_requests: AtomicUsize,
    pub chunk_status: AtomicU16,
    pub empty_chunks: AtomicBool,
    pub chunk_requests: AtomicUsize,
}

pub struct StreamServer {
    pub state: Arc<ServerState>,
    pub base: Url,
}

pub fn chunklist(seq: u64, count: u64, duration: f64) -> String {
    let mut cl = format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:1\n#EXT-X-MEDIA-SEQUENCE:{}\n",
        seq
    );
    for n in seq..seq + count {
        cl.push_str(&format!("#EXTINF:{},\nmedia_{}.ts?nc=0.353\n", duration, n));
    }
    cl
}

pub fn chunk_body(n: u64) -> String {
    format!("<chunk {}>", n)
}

async fn playlist(State(state): State<Arc<ServerState>>) -> Response {
    state.playlist_requests.fetch_add(1, Ordering::SeqCst);
    let failing = state
        .playlist_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return StatusCode::FORBIDDEN.into_response();
    }
    state.playlist.lock().unwrap().clone().into_response()
}

async fn chunklist_handler(State(state): State<Arc<ServerState>>) -> Response {
    let n = state.chunklist_requests.fetch_add(1, Ordering::SeqCst);
    let status = StatusCode::from_u16(state.chunklist_status.load(Ordering::SeqCst)).unwrap();
    if !status.is_success() {
        return status.into_response();
    }
    let idx = n.min(state.chunklists.len() - 1);
    state.chunklists[idx].clone().into_response()
}

async fn chunk(State(state): State<Arc<ServerState>>, Path(name): Path<String>) -> Response {
    state.chunk_requests.fetch_add(1, Ordering::SeqCst);
    let status = StatusCode::from_u16(state.chunk_status.load(Ordering::SeqCst)).unwrap();
    if !status.is_success() {
        return status.into_response();
    }
    if state.empty_chunks.load(Ordering::SeqCst) {
        return Vec::<u8>::new().into_response();
    }
    let n: u64 = name
        .trim_start_matches("media_")
        .trim_end_matches(".ts")
        .parse()
        .unwrap();
    chunk_body(n).into_response()
}

impl StreamServer {
    pub async fn start(chunklists: Vec<String>) -> Self {
        let state = Arc::new(ServerState {
            playlist: Mutex::new(PLAYLIST.to_string()),
            playlist_failures: AtomicUsize::new(0),
            playlist_requests: AtomicUsize::new(0),
            chunklists,
            chunklist_status: AtomicU16::new(200),
            chunklist_requests: AtomicUsize::new(0),
            chunk_status: AtomicU16::new(200),
            empty_chunks: AtomicBool::new(false),
            chunk_requests: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/live/playlist.m3u8", get(playlist))
            .route("/live/chunklist.m3u8", get(chunklist_handler))
            .route("/live/:chunk", get(chunk))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let base = Url::parse(&format!("http://{}/live/", addr)).unwrap();
        Self { state, base }
    }

    pub fn playlist_url(&self) -> Url {
        self.base.join("playlist.m3u8?nc=0.5").unwrap()
    }
}

pub fn client() -> HttpClient {
    HttpClient::new(&HttpConfig::default()).unwrap()
}

pub fn capture_config(output_dir: PathBuf) -> CaptureConfig {
    CaptureConfig {
        manifest_retry_delay: Duration::ZERO,
        min_poll_interval: Duration::from_millis(50),
        output_dir,
        ..CaptureConfig::default()
    }
}

/// Polls `cond` for up to five seconds.
pub async fn wait_for(cond: impl Fn() -> bool) -> bool {
    for _ in 0..250 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}
