//! Persistent chat connection.
//!
//! [`ChatSession`] performs the guest login handshake, keeps the connection
//! alive with jittered no-op frames, and hands decoded messages out one at a
//! time through [`ChatSession::next_message`].

use std::{collections::VecDeque, ops::RangeInclusive, sync::Arc, time::Duration};

use futures::{
    stream::{self, SplitSink, SplitStream},
    SinkExt, Stream, StreamExt,
};
use rand::Rng;
use tokio::{net::TcpStream, sync::Mutex, task::JoinHandle};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::SessionConfig,
    frame::{FrameDecoder, FrameError, Message},
};

/// Protocol version announcement, the first frame of every connection.
pub const HANDSHAKE_VERSION: &str = "fcsws_20180422\n\0";
pub const GUEST_LOGIN: &str = "1 0 0 20071025 0 1/guest:guest\n\0";
pub const KEEPALIVE: &str = "0 0 0 0 0\n\0";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = Arc<Mutex<SplitSink<WsStream, WsMessage>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Assigned by the server in its login reply.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionIdentity {
    pub session_id: i64,
    pub session_name: String,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("session is already connected")]
    AlreadyConnected,
    #[error("connection closed before the login reply")]
    ClosedDuringHandshake,
    #[error("malformed login reply: {0}")]
    MalformedReply(#[from] FrameError),
    #[error("login reply carries no session name")]
    MissingSessionName,
}

struct Keepalive {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ChatSession {
    config: SessionConfig,
    state: SessionState,
    identity: Option<SessionIdentity>,
    sink: Option<WsSink>,
    stream: Option<SplitStream<WsStream>>,
    decoder: FrameDecoder,
    pending: VecDeque<Message>,
    keepalive: Option<Keepalive>,
}

impl ChatSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Disconnected,
            identity: None,
            sink: None,
            stream: None,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            keepalive: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn identity(&self) -> Option<&SessionIdentity> {
        self.identity.as_ref()
    }

    /// Opens the connection, logs in as a guest and starts the keepalive task.
    pub async fn connect(&mut self, url: &str) -> Result<SessionIdentity, SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::AlreadyConnected);
        }

        self.state = SessionState::Connecting;
        match self.open(url).await {
            Ok(identity) => {
                info!(
                    "Logged in as {} (session {})",
                    identity.session_name, identity.session_id
                );
                self.identity = Some(identity.clone());
                self.state = SessionState::Connected;
                Ok(identity)
            }
            Err(e) => {
                self.sink = None;
                self.stream = None;
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn open(&mut self, url: &str) -> Result<SessionIdentity, SessionError> {
        debug!("Connecting to {}", url);
        let (ws, _) = connect_async(url).await?;
        let (mut sink, mut stream) = ws.split();

        sink.send(WsMessage::text(HANDSHAKE_VERSION.to_string()))
            .await?;
        sink.send(WsMessage::text(GUEST_LOGIN.to_string())).await?;

        // The reply is the first frame the server sends back. Anything that
        // arrived with it stays queued for iteration.
        self.decoder = FrameDecoder::new();
        let reply = loop {
            if let Some(frame) = self.decoder.next_frame() {
                break frame?;
            }
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => self.decoder.extend(text.as_bytes()),
                Some(Ok(WsMessage::Binary(data))) => self.decoder.extend(&data),
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(SessionError::ClosedDuringHandshake)
                }
                Some(Ok(_)) => (),
                Some(Err(e)) => return Err(e.into()),
            }
        };
        self.queue_buffered();

        let identity = SessionIdentity {
            session_id: reply.to,
            session_name: reply
                .payload
                .map(|p| p.to_string())
                .ok_or(SessionError::MissingSessionName)?,
        };

        let sink = Arc::new(Mutex::new(sink));
        self.keepalive = Some(spawn_keepalive(
            sink.clone(),
            self.config.keepalive_interval.clone(),
        ));
        self.sink = Some(sink);
        self.stream = Some(stream);

        Ok(identity)
    }

    /// Sends `text` verbatim. Does nothing when the session is not connected.
    pub async fn send(&self, text: &str) -> Result<(), SessionError> {
        let sink = match (&self.sink, self.state) {
            (Some(sink), SessionState::Connected) => sink,
            _ => {
                debug!("Not connected, dropping outgoing frame {:?}", text);
                return Ok(());
            }
        };

        sink.lock()
            .await
            .send(WsMessage::text(text.to_string()))
            .await?;
        Ok(())
    }

    /// Next decoded message, or `None` once the connection is closed.
    ///
    /// Messages already decoded are handed out before the connection is read
    /// again. Cancel safe: dropping the future loses no message.
    pub async fn next_message(&mut self) -> Option<Message> {
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return Some(msg);
            }
            if self.state != SessionState::Connected {
                return None;
            }

            let next = match self.stream.as_mut() {
                Some(stream) => stream.next().await,
                None => return None,
            };

            match next {
                Some(Ok(WsMessage::Text(text))) => {
                    self.decoder.extend(text.as_bytes());
                    self.queue_buffered();
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    self.decoder.extend(&data);
                    self.queue_buffered();
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    info!("Connection closed by server: {:?}", frame);
                    self.mark_closed();
                }
                Some(Ok(_)) => (),
                Some(Err(e)) => {
                    warn!("Connection error: {}", e);
                    self.mark_closed();
                }
                None => {
                    info!("Connection closed");
                    self.mark_closed();
                }
            }
        }
    }

    /// The session as a stream of messages, ending when the connection closes.
    pub fn messages(&mut self) -> impl Stream<Item = Message> + '_ {
        stream::unfold(self, |session| async move {
            let msg = session.next_message().await?;
            Some((msg, session))
        })
    }

    fn queue_buffered(&mut self) {
        for frame in self.decoder.frames() {
            match frame {
                Ok(msg) => self.pending.push_back(msg),
                Err(e) => warn!("Dropping malformed frame: {}", e),
            }
        }
    }

    fn mark_closed(&mut self) {
        self.state = SessionState::Disconnected;
        self.stream = None;
        if let Some(keepalive) = &self.keepalive {
            keepalive.token.cancel();
        }
    }

    /// Stops the keepalive task, waits for it to finish, then closes the
    /// connection. No keepalive frame is written after this returns.
    pub async fn disconnect(&mut self) {
        if self.sink.is_none() && self.keepalive.is_none() {
            return;
        }
        self.state = SessionState::Disconnecting;

        if let Some(keepalive) = self.keepalive.take() {
            keepalive.token.cancel();
            if let Err(e) = keepalive.handle.await {
                warn!("Keepalive task failed: {}", e);
            }
            info!("Keepalive stopped");
        }

        if let Some(sink) = self.sink.take() {
            if let Err(e) = sink.lock().await.close().await {
                debug!("Error while closing connection: {}", e);
            }
        }

        self.stream = None;
        self.pending.clear();
        self.state = SessionState::Disconnected;
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.token.cancel();
            keepalive.handle.abort();
        }
    }
}

fn keepalive_delay(range: &RangeInclusive<Duration>) -> Duration {
    if range.start() >= range.end() {
        return *range.start();
    }
    rand::thread_rng().gen_range(range.clone())
}

fn spawn_keepalive(sink: WsSink, interval: RangeInclusive<Duration>) -> Keepalive {
    let token = CancellationToken::new();
    let cancelled = token.clone();

    let handle = tokio::spawn(async move {
        loop {
            let sent = tokio::select! {
                biased;
                _ = cancelled.cancelled() => break,
                res = async {
                    sink.lock()
                        .await
                        .send(WsMessage::text(KEEPALIVE.to_string()))
                        .await
                } => res,
            };
            if let Err(e) = sent {
                debug!("Keepalive write failed, stopping: {}", e);
                break;
            }
            trace!("Sent keepalive");

            let delay = keepalive_delay(&interval);
            tokio::select! {
                _ = cancelled.cancelled() => break,
                _ = tokio::time::sleep(delay) => (),
            }
        }
    });

    Keepalive { token, handle }
}
