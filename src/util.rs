use std::sync::Arc;

use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    StatusCode,
};
use reqwest_cookie_store::CookieStoreMutex;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

use crate::config::HttpConfig;

/// Shared HTTP client. Requests are stateless, so one instance is handed to
/// every capture behind an `Arc`.
pub struct HttpClient {
    pub client: ClientWithMiddleware,
    pub cookies: Arc<CookieStoreMutex>,
}

#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error("reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("reqwest middleware error: {0}")]
    ReqwestMiddlewareError(#[from] reqwest_middleware::Error),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] header::InvalidHeaderValue),
    #[error("HTTP status {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },
}

impl DownloadError {
    /// The server answered, but with a non-success status.
    pub fn is_http_status(&self) -> bool {
        matches!(self, DownloadError::HttpStatus { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DownloadError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<HttpClient, DownloadError> {
        let cookies = Arc::new(CookieStoreMutex::default());

        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_str(&config.user_agent)?);
        headers.insert(header::REFERER, HeaderValue::from_str(&config.referer)?);

        let client = reqwest::Client::builder()
            .cookie_provider(cookies.clone())
            .default_headers(headers)
            .build()?;

        let mut builder = reqwest_middleware::ClientBuilder::new(client);
        if config.transport_retries > 0 {
            let retry_policy =
                ExponentialBackoff::builder().build_with_max_retries(config.transport_retries);
            builder = builder.with(RetryTransientMiddleware::new_with_policy(retry_policy));
        }

        Ok(HttpClient {
            client: builder.build(),
            cookies,
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(resp)
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, DownloadError> {
        self.get(url).await?.text().await.map_err(|e| e.into())
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let mut resp = self.get(url).await?;
        let mut body = Vec::new();

        while let Some(chunk) = resp.chunk().await? {
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value > 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", value, UNITS[unit])
}
