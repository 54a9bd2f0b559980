//! Server directory published by the site.
//!
//! The directory maps camera server ids to video hostnames and lists the chat
//! servers. Loading it takes two requests: the main page, which carries a
//! cache-busting counter, and the server config script itself.

use std::collections::HashMap;

use rand::seq::IteratorRandom;
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;

use crate::util::{DownloadError, HttpClient};

pub const MAIN_PAGE_URL: &str = "https://www.myfreecams.com/";
pub const SERVER_CONFIG_URL: &str = "https://assets.mfcimg.com/_js/serverconfig.js";
pub const HOST_SUFFIX: &str = ".myfreecams.com";
/// Added to a broadcaster's uid to get the id of their stream room.
pub const ROOM_ID_OFFSET: u64 = 100_000_000;

#[derive(thiserror::Error, Debug)]
pub enum DirectoryError {
    #[error("could not download server directory")]
    DownloadError(#[from] DownloadError),
    #[error("no server config counter on the main page")]
    MissingCounter,
    #[error("invalid pattern")]
    RegexError(#[from] regex::Error),
    #[error("could not parse server config")]
    ParseError(#[from] serde_json::Error),
}

/// Produces the playlist URL of a broadcaster's stream.
pub trait ManifestResolver: Send + Sync {
    /// `None` when the camera server is unknown.
    fn manifest_url(&self, camserv: u32, uid: u64) -> Option<Url>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub h5video_servers: HashMap<String, String>,
    #[serde(default)]
    pub ngvideo_servers: HashMap<String, String>,
    #[serde(default)]
    pub wzobs_servers: HashMap<String, String>,
    #[serde(default)]
    pub websocket_servers: HashMap<String, String>,
    #[serde(default)]
    pub chat_servers: Vec<String>,
}

fn parse_counter(page: &str) -> Result<u64, DirectoryError> {
    let re = Regex::new(r"var g_nVcc = (\d+);")?;
    re.captures(page)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or(DirectoryError::MissingCounter)
}

fn server_config_nonce(counter: u64, now_ms: u64) -> u64 {
    now_ms / 86400 + counter
}

impl ServerConfig {
    pub async fn load(client: &HttpClient) -> Result<Self, DirectoryError> {
        let page = client.fetch_text(MAIN_PAGE_URL).await?;
        let counter = parse_counter(&page)?;
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;

        let url = format!(
            "{}?nc={}",
            SERVER_CONFIG_URL,
            server_config_nonce(counter, now_ms)
        );
        debug!("Loading server config from {}", url);
        let config = client.fetch_text(&url).await?;

        Ok(serde_json::from_str(&config)?)
    }

    /// Video hostname of a camera server, searched category by category.
    pub fn video_server(&self, camserv: u32) -> Option<&str> {
        let key = camserv.to_string();
        [
            &self.h5video_servers,
            &self.ngvideo_servers,
            &self.wzobs_servers,
        ]
        .into_iter()
        .find_map(|servers| servers.get(&key))
        .map(String::as_str)
    }

    /// Picks one of the websocket chat servers at random.
    pub fn random_chat_server(&self) -> Option<&str> {
        self.websocket_servers
            .keys()
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }
}

impl ManifestResolver for ServerConfig {
    fn manifest_url(&self, camserv: u32, uid: u64) -> Option<Url> {
        let host = self.video_server(camserv)?;
        let url = format!(
            "https://{}{}:443/NxServer/ngrp:mfc_{}.f4v_mobile/playlist.m3u8?nc={}",
            host,
            HOST_SUFFIX,
            uid + ROOM_ID_OFFSET,
            rand::random::<f64>()
        );
        Url::parse(&url).ok()
    }
}

pub fn chat_url(server: &str) -> String {
    format!("wss://{}{}:443/fcsl", server, HOST_SUFFIX)
}
