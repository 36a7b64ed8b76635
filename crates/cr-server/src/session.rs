//! Per-connection session
//!
//! A session owns one device link. Its reader runs the handshake state
//! machine and forwards clipboard changes to the router; its writer drains
//! the outbound queue and keeps the link alive with pings. Both loops run in
//! the same task and the session returns only after both have finished.
//!
//! ```text
//! Connecting -> Unauthenticated --register ok--> Authenticated -> Closed
//!                     |                                ^
//!                     +--bad credentials / violation---+
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use cr_core::auth::{self, VerifyError};
use cr_protocol::{decode, encode_text, DecodeError, SyncMode, WireMessage};

use crate::router::{RoutedMessage, RouterError, SessionHandle, SessionKey};
use crate::state::ServerState;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Link accepted, loops not started yet
    Connecting,
    /// Waiting for `register`
    Unauthenticated,
    /// Registered with the router
    Authenticated,
    /// Reader finished; nothing is routed to this session any more
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Unauthenticated => write!(f, "unauthenticated"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Reasons a session ended abnormally
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] axum::Error),

    #[error("No frame within {0:?}")]
    ReadTimeout(Duration),

    #[error("No register within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("Undecodable handshake: {0}")]
    Decode(#[from] DecodeError),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Authentication failed: {0}")]
    Auth(#[from] VerifyError),

    #[error("Router error: {0}")]
    Router(#[from] RouterError),
}

/// Server side of one device link
pub struct Session {
    key: SessionKey,
    state: SessionState,
    /// Device id, as assigned by the router once authenticated
    id: String,
    username: String,
    mode: SyncMode,
    server: Arc<ServerState>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(server: Arc<ServerState>) -> Self {
        let cancel = server.shutdown.child_token();
        Self {
            key: SessionKey::next(),
            state: SessionState::Connecting,
            id: String::new(),
            username: String::new(),
            mode: SyncMode::Auto,
            server,
            cancel,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the link until it closes
    pub async fn run(mut self, socket: WebSocket) -> Result<(), SessionError> {
        let config = &self.server.config;
        let (sink, stream) = socket.split();
        let (tx, rx) = mpsc::channel(config.session_queue_capacity);

        let writer = write_loop(
            sink,
            rx,
            self.cancel.clone(),
            config.ping_period,
            config.write_timeout,
        );

        self.state = SessionState::Unauthenticated;
        tracing::debug!("Session {} started", self.key);

        let reader = async {
            let result = self.read_loop(stream, tx).await;
            self.close().await;
            result
        };

        let (write_result, read_result) = tokio::join!(writer, reader);

        if let Err(e) = &write_result {
            tracing::warn!("Session {} ({}) write side failed: {}", self.key, self.id, e);
        }
        match &read_result {
            Ok(()) => tracing::info!("Session {} ({}) closed", self.key, self.id),
            Err(e) => tracing::warn!("Session {} ({}) closed: {}", self.key, self.id, e),
        }

        read_result.and(write_result)
    }

    async fn close(&mut self) {
        let was_registered = self.state == SessionState::Authenticated;
        self.state = SessionState::Closed;

        // Unregistering drops the router's sender, which stops the writer.
        // If the router is gone there is no sender left to drop.
        if was_registered && self.server.router.unregister(self.key).await.is_err() {
            self.cancel.cancel();
        }
    }

    async fn read_loop(
        &mut self,
        mut stream: SplitStream<WebSocket>,
        tx: mpsc::Sender<WireMessage>,
    ) -> Result<(), SessionError> {
        let handshake_timeout = self.server.config.handshake_timeout;
        let read_timeout = self.server.config.read_timeout;
        let handshake_deadline = Instant::now() + handshake_timeout;

        // Handed to the router on successful registration; dropped (closing
        // the queue) if the handshake fails.
        let mut tx = Some(tx);

        loop {
            let deadline = if self.state == SessionState::Unauthenticated {
                handshake_deadline
            } else {
                Instant::now() + read_timeout
            };

            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Session {} cancelled", self.key);
                    return Ok(());
                }
                next = timeout_at(deadline, stream.next()) => next,
            };

            let message = match next {
                Err(_) if self.state == SessionState::Unauthenticated => {
                    return Err(SessionError::HandshakeTimeout(handshake_timeout));
                }
                Err(_) => return Err(SessionError::ReadTimeout(read_timeout)),
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) => return Err(SessionError::Transport(e)),
                Ok(Some(Ok(message))) => message,
            };

            let payload = match message {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(data) => data,
                // Any frame, pongs included, pushes the read deadline forward.
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => {
                    tracing::debug!("Session {} received close frame", self.key);
                    return Ok(());
                }
            };

            let decoded = decode(&payload);
            match self.state {
                SessionState::Unauthenticated => self.handshake(decoded, &mut tx).await?,
                SessionState::Authenticated => {
                    if !self.dispatch(decoded).await? {
                        return Ok(());
                    }
                }
                SessionState::Connecting | SessionState::Closed => return Ok(()),
            }
        }
    }

    /// Handle the first frame of an unauthenticated link
    async fn handshake(
        &mut self,
        decoded: Result<WireMessage, DecodeError>,
        tx: &mut Option<mpsc::Sender<WireMessage>>,
    ) -> Result<(), SessionError> {
        let (requested_id, credentials) = match decoded? {
            WireMessage::Register {
                user_id,
                credentials,
            } => (user_id, credentials),
            other => {
                return Err(SessionError::Protocol(format!(
                    "'{}' before register",
                    other.action()
                )));
            }
        };

        if let Err(e) = auth::authenticate(
            self.server.credentials.as_ref(),
            &credentials.username,
            &credentials.password_hash,
        )
        .await
        {
            tracing::warn!(
                "Session {} rejected register from {}: {}",
                self.key,
                requested_id,
                e
            );
            return Err(e.into());
        }

        let tx = tx
            .take()
            .ok_or_else(|| SessionError::Protocol("queue already handed off".to_string()))?;
        let handle = SessionHandle::new(
            self.key,
            requested_id,
            credentials.username.clone(),
            credentials.mode,
            tx,
        )
        .with_cancel(self.cancel.clone());

        self.id = self.server.router.register(handle).await?;
        self.username = credentials.username;
        self.mode = credentials.mode;
        self.state = SessionState::Authenticated;

        tracing::info!(
            "Session {} authenticated as {} of {} ({} mode)",
            self.key,
            self.id,
            self.username,
            self.mode
        );
        Ok(())
    }

    /// Handle a frame on an authenticated link; `false` ends the session
    async fn dispatch(
        &mut self,
        decoded: Result<WireMessage, DecodeError>,
    ) -> Result<bool, SessionError> {
        let message = match decoded {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Session {} dropped undecodable frame: {}", self.id, e);
                return Ok(true);
            }
        };

        match message {
            WireMessage::ClipboardChanged { data, .. } => {
                tracing::debug!("{} bytes of clipboard from {}", data.len(), self.id);

                if let Err(e) = self
                    .server
                    .content
                    .insert_clip_content(&self.id, &self.username, data.clone())
                    .await
                {
                    tracing::error!("Failed to store clipboard from {}: {}", self.id, e);
                }

                self.server
                    .router
                    .broadcast(RoutedMessage::new(
                        self.id.clone(),
                        self.username.clone(),
                        data,
                    ))
                    .await?;
                Ok(true)
            }
            WireMessage::Terminate { .. } => {
                tracing::info!("Device {} of {} terminated", self.id, self.username);
                Ok(false)
            }
            WireMessage::Register { .. } | WireMessage::Ready { .. } => {
                tracing::warn!(
                    "Session {} dropped unexpected '{}'",
                    self.id,
                    message.action()
                );
                Ok(true)
            }
        }
    }
}

/// Drain the outbound queue and ping on schedule
///
/// Returns when the queue is closed or the session is cancelled, sending a
/// close frame on the way out. Every exit cancels the session, so the reader
/// never outlives the writer.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<WireMessage>,
    cancel: CancellationToken,
    ping_period: Duration,
    write_timeout: Duration,
) -> Result<(), SessionError> {
    let mut ping = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            next = rx.recv() => match next {
                Some(message) => Message::Text(encode_text(&message)),
                None => break Ok(()),
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
        };

        if let Err(e) = send_bounded(&mut sink, frame, write_timeout).await {
            break Err(e);
        }
    };

    if result.is_ok() {
        let _ = send_bounded(&mut sink, Message::Close(None), write_timeout).await;
    }
    cancel.cancel();
    result
}

async fn send_bounded(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: Message,
    write_timeout: Duration,
) -> Result<(), SessionError> {
    timeout(write_timeout, sink.send(frame))
        .await
        .map_err(|_| SessionError::WriteTimeout(write_timeout))?
        .map_err(SessionError::Transport)
}
