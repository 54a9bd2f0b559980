use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    directory::{self, DirectoryError, ManifestResolver, ServerConfig},
    frame::{Message, Payload},
    presence::{PresenceMonitor, FCTYPE_USERNAMELOOKUP},
    session::{ChatSession, SessionError},
    signer::{self, Crc32Signer, QuerySigner},
    util::{DownloadError, HttpClient},
};

#[derive(thiserror::Error, Debug)]
pub enum GrabberError {
    #[error("could not create HTTP client")]
    HttpClientError(#[from] DownloadError),
    #[error("could not load server directory")]
    DirectoryError(#[from] DirectoryError),
    #[error("no chat server in the server directory")]
    NoChatServer,
    #[error("chat session error")]
    SessionError(#[from] SessionError),
}

/// Watches the chat for the tracked broadcasters and captures them while
/// they are live.
pub struct Grabber {
    config: Config,
    names: Vec<String>,
    client: Arc<HttpClient>,
    session: ChatSession,
    signer: Box<dyn QuerySigner>,
}

impl Grabber {
    pub fn new(names: Vec<String>, config: Config) -> Result<Self, GrabberError> {
        let client = Arc::new(HttpClient::new(&config.http)?);
        let session = ChatSession::new(config.session.clone());

        Ok(Self {
            config,
            names: names.iter().map(|n| n.to_lowercase()).collect(),
            client,
            session,
            signer: Box::new(Crc32Signer),
        })
    }

    pub fn with_signer(mut self, signer: impl QuerySigner + 'static) -> Self {
        self.signer = Box::new(signer);
        self
    }

    /// Loads the server directory, then watches a random chat server until
    /// `shutdown` fires or the connection closes.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), GrabberError> {
        let directory = Arc::new(ServerConfig::load(&self.client).await?);
        info!("Server config loaded");

        let server = directory
            .random_chat_server()
            .ok_or(GrabberError::NoChatServer)?;
        let url = directory::chat_url(server);
        self.watch(&url, directory.clone(), shutdown).await
    }

    /// Connects to the chat at `url` and drives captures from the presence
    /// updates it delivers. On shutdown every capture is stopped before the
    /// connection is closed. When the server closes the connection, running
    /// captures are left to finish on their own.
    pub async fn watch(
        &mut self,
        url: &str,
        resolver: Arc<dyn ManifestResolver>,
        shutdown: CancellationToken,
    ) -> Result<(), GrabberError> {
        let mut monitor = PresenceMonitor::new(
            &self.names,
            self.client.clone(),
            resolver,
            self.config.capture.clone(),
        );

        let identity = self.session.connect(url).await?;
        self.lookup_broadcasters(identity.session_id, &monitor.tracked())
            .await;

        let mut status_timer = tokio::time::interval(self.config.status_interval);
        status_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut shutting_down = false;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutting down");
                    shutting_down = true;
                    break;
                }
                _ = status_timer.tick() => log_status(&mut monitor),
                msg = self.session.next_message() => match msg {
                    Some(msg) => monitor.handle_message(&msg),
                    None => {
                        warn!("Chat connection closed");
                        break;
                    }
                },
            }
        }

        while !shutting_down && monitor.any_in_progress() {
            tokio::select! {
                _ = shutdown.cancelled() => shutting_down = true,
                _ = status_timer.tick() => log_status(&mut monitor),
            }
        }

        monitor.stop_all().await;
        info!("Stop chat");
        self.session.disconnect().await;
        Ok(())
    }

    async fn lookup_broadcasters(&self, session_id: i64, names: &[String]) {
        for name in names {
            let now_ms = chrono::Utc::now().timestamp_millis();
            let signature = signer::lookup_signature(self.signer.as_ref(), name, now_ms);
            let query = Message::new(FCTYPE_USERNAMELOOKUP, session_id, 0, signature, 0)
                .with_payload(Payload::Raw(name.clone()));

            debug!("Looking up {}", name);
            if let Err(e) = self.session.send(&query.to_command()).await {
                warn!("Cannot send lookup for {}: {}", name, e);
            }
        }
    }
}

fn log_status(monitor: &mut PresenceMonitor) {
    for line in monitor.status_lines() {
        info!("{}", line);
    }
}
