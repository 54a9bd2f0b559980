//! Broadcaster presence tracking.
//!
//! [`PresenceMonitor`] owns one [`StreamLoader`] per tracked broadcaster and
//! starts or stops it as status updates come in over the chat connection.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use serde::Deserialize;
use serde_aux::prelude::*;
use serde_json::{Map, Value};

use crate::{
    capture::StreamLoader,
    config::CaptureConfig,
    directory::ManifestResolver,
    frame::{Message, Payload},
    util::HttpClient,
};

/// Reply to a username lookup.
pub const FCTYPE_USERNAMELOOKUP: i64 = 10;
/// Unsolicited status change.
pub const FCTYPE_SESSIONSTATE: i64 = 20;

/// Video status of a broadcaster in public chat, the only status with a feed.
pub const LIVE: i64 = 0;

pub fn status_name(status: i64) -> Option<&'static str> {
    match status {
        0 => Some("public chat"),
        2 => Some("away"),
        12 => Some("in private"),
        90 => Some("webcam is off"),
        127 => Some("offline"),
        _ => None,
    }
}

fn describe_status(status: i64) -> String {
    status_name(status)
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string())
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserDetails {
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub camserv: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PresenceUpdate {
    #[serde(rename = "nm")]
    pub name: String,
    #[serde(rename = "vs", deserialize_with = "deserialize_number_from_string")]
    pub status: i64,
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub uid: Option<u64>,
    #[serde(rename = "u", default)]
    pub user: Option<UserDetails>,
}

impl PresenceUpdate {
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(payload.clone()))
    }

    pub fn camserv(&self) -> Option<u32> {
        self.user.as_ref().and_then(|u| u.camserv)
    }
}

pub struct PresenceMonitor {
    tracked: HashSet<String>,
    loaders: BTreeMap<String, StreamLoader>,
    client: Arc<HttpClient>,
    resolver: Arc<dyn ManifestResolver>,
    config: Arc<CaptureConfig>,
}

impl PresenceMonitor {
    pub fn new<I, S>(
        names: I,
        client: Arc<HttpClient>,
        resolver: Arc<dyn ManifestResolver>,
        config: CaptureConfig,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tracked: names.into_iter().map(|n| n.as_ref().to_lowercase()).collect(),
            loaders: BTreeMap::new(),
            client,
            resolver,
            config: Arc::new(config),
        }
    }

    /// Tracked broadcaster names, lower-cased and sorted.
    pub fn tracked(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tracked.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.tracked.contains(&name.to_lowercase())
    }

    pub fn loader(&self, name: &str) -> Option<&StreamLoader> {
        self.loaders.get(&name.to_lowercase())
    }

    pub fn loader_mut(&mut self, name: &str) -> Option<&mut StreamLoader> {
        self.loaders.get_mut(&name.to_lowercase())
    }

    /// Dispatches status updates of tracked broadcasters; everything else is
    /// ignored. Never waits on a capture.
    pub fn handle_message(&mut self, msg: &Message) {
        if msg.kind != FCTYPE_USERNAMELOOKUP && msg.kind != FCTYPE_SESSIONSTATE {
            return;
        }
        let payload = match msg.payload.as_ref().and_then(Payload::as_structured) {
            Some(payload) => payload,
            None => return,
        };
        match payload.get("nm").and_then(Value::as_str) {
            Some(name) if self.is_tracked(name) => (),
            _ => return,
        }

        match PresenceUpdate::from_payload(payload) {
            Ok(update) => self.handle_update(update),
            Err(e) => warn!("Cannot parse status update {:?}: {}", payload, e),
        }
    }

    pub fn handle_update(&mut self, update: PresenceUpdate) {
        let client = &self.client;
        let config = &self.config;
        let loader = self
            .loaders
            .entry(update.name.to_lowercase())
            .or_insert_with(|| StreamLoader::new(&update.name, client.clone(), config.clone()));

        if update.status != LIVE {
            info!("{} status is {}", update.name, describe_status(update.status));
            loader.stop_capture();
            return;
        }

        if loader.in_progress() {
            debug!("{} already in progress", update.name);
            return;
        }
        info!("{} status is {}", update.name, describe_status(update.status));

        let (camserv, uid) = match (update.camserv(), update.uid) {
            (Some(camserv), Some(uid)) => (camserv, uid),
            _ => {
                warn!("{}: No camserver, webcam is not published yet", update.name);
                return;
            }
        };

        match self.resolver.manifest_url(camserv, uid) {
            Some(url) => loader.start_capture(url),
            None => info!("Cannot get stream URL for {} (camserv {})", update.name, camserv),
        }
    }

    /// Status lines of the broadcasters currently being captured.
    pub fn status_lines(&mut self) -> Vec<String> {
        self.loaders
            .values_mut()
            .filter_map(|loader| loader.in_progress().then(|| loader.status()))
            .collect()
    }

    pub fn any_in_progress(&mut self) -> bool {
        self.loaders.values_mut().any(StreamLoader::in_progress)
    }

    /// Stops every capture and waits for the capture tasks to exit.
    pub async fn stop_all(&mut self) {
        for loader in self.loaders.values_mut() {
            loader.shutdown().await;
        }
    }
}
