//! Device link to the relay
//!
//! The connector owns the WebSocket for one device: it runs the
//! register/ready handshake, forwards local clipboard changes through a
//! bounded outbound queue, applies remote changes to the local clipboard and
//! re-establishes the link whenever it drops.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connected ...
//!                                    \                         |
//!                                     +----- cancel -----> Disconnected
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use cr_core::auth::hash_password;
use cr_core::config::ClientConfig;
use cr_core::error::ConfigError;
use cr_protocol::{
    decode, encode_text, Credentials, DecodeError, SyncMode, WireMessage, MAX_MESSAGE_SIZE,
};

use crate::clipboard::{Clipboard, ClipboardError};
use crate::reconnect::ExponentialBackoff;
use crate::remote::{RemoteClipboard, RemoteError};
use crate::trigger::Trigger;

pub use cr_core::ConnectionStatus as ConnectorState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connector errors
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("No ready within {0:?}")]
    HandshakeTimeout(Duration),

    /// The relay closed the link instead of answering `ready`
    #[error("Relay rejected the handshake")]
    Rejected,

    #[error("Unexpected handshake reply: {0}")]
    UnexpectedReply(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("No frame within {0:?}")]
    ReadTimeout(Duration),

    #[error("Not connected")]
    NotConnected,

    #[error("Relay closed the link")]
    ConnectionClosed,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Credentials cannot be sent: {0}")]
    Credentials(DecodeError),

    #[error("Clipboard error: {0}")]
    Clipboard(#[from] ClipboardError),

    #[error("REST error: {0}")]
    Remote(#[from] RemoteError),
}

/// Client side of one device link
pub struct Connector {
    config: ClientConfig,
    clipboard: Arc<dyn Clipboard>,
    remote: RemoteClipboard,
    /// Device id; replaced by the id the relay assigns on each handshake
    id: Mutex<String>,
    state: watch::Sender<ConnectorState>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    source: tokio::sync::Mutex<Option<WsSource>>,
    outbound_tx: mpsc::Sender<WireMessage>,
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<WireMessage>>,
    /// Content known to be on the relay already; the watcher does not
    /// resend it
    last_synced: Mutex<Option<Bytes>>,
}

impl Connector {
    pub fn new(config: ClientConfig, clipboard: Arc<dyn Clipboard>) -> Result<Self, ConnectError> {
        config.validate()?;
        let remote = RemoteClipboard::from_config(&config)?;
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity.max(1));
        let (state, _) = watch::channel(ConnectorState::Disconnected);

        Ok(Self {
            id: Mutex::new(config.device_id()),
            config,
            clipboard,
            remote,
            state,
            sink: tokio::sync::Mutex::new(None),
            source: tokio::sync::Mutex::new(None),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            last_synced: Mutex::new(None),
        })
    }

    /// Current device id
    pub fn id(&self) -> String {
        lock(&self.id).clone()
    }

    pub fn state(&self) -> ConnectorState {
        *self.state.borrow()
    }

    /// Follow state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectorState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Connector {} -> {}", previous, state);
        }
    }

    /// Open the link and run the handshake
    ///
    /// On success the relay-assigned id is adopted and the connector is
    /// `Connected`. On failure the previous state is kept.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let previous = self.state();
        if previous != ConnectorState::Reconnecting {
            self.set_state(ConnectorState::Connecting);
        }

        let url = self.config.websocket_url();
        let handshake_timeout = self.config.handshake_timeout;
        tracing::debug!("Connecting to {}", url);

        let result = match timeout(handshake_timeout, self.handshake(&url)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::HandshakeTimeout(handshake_timeout)),
        };

        let (ws, assigned) = match result {
            Ok(link) => link,
            Err(e) => {
                self.set_state(previous);
                return Err(e);
            }
        };

        let requested = self.id();
        if assigned != requested {
            tracing::info!("Relay assigned id {} (requested {})", assigned, requested);
        }
        *lock(&self.id) = assigned;

        let (sink, source) = ws.split();
        *self.sink.lock().await = Some(sink);
        *self.source.lock().await = Some(source);

        self.set_state(ConnectorState::Connected);
        tracing::info!("Connected to {} as {}", url, self.id());
        Ok(())
    }

    async fn handshake(&self, url: &str) -> Result<(WsStream, String), ConnectError> {
        let (mut ws, _) = connect_async(url).await?;

        let credentials = Credentials::new(
            &self.config.auth.user,
            hash_password(&self.config.auth.password),
            self.config.mode,
        )
        .map_err(ConnectError::Credentials)?;
        let register = WireMessage::Register {
            user_id: self.id(),
            credentials,
        };
        ws.send(Message::Text(encode_text(&register))).await?;

        loop {
            let payload = match ws.next().await {
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(ConnectError::Rejected),
                Some(Err(e)) => return Err(e.into()),
            };

            return match decode(&payload) {
                Ok(WireMessage::Ready { user_id }) => Ok((ws, user_id)),
                Ok(other) => Err(ConnectError::UnexpectedReply(other.action().to_string())),
                Err(e) => Err(ConnectError::UnexpectedReply(e.to_string())),
            };
        }
    }

    /// Retry [`connect`](Self::connect) on the backoff schedule
    ///
    /// Waits one interval before every attempt. Returns `Cancelled` if
    /// `cancel` fires first.
    pub async fn reconnect(&self, cancel: &CancellationToken) -> Result<(), ConnectError> {
        let mut backoff = ExponentialBackoff::from_config(&self.config.backoff);

        loop {
            let delay = backoff.next_delay();
            tracing::info!("Reconnecting in {:?}", delay);

            tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            let attempt = tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectError::Cancelled),
                attempt = self.connect() => attempt,
            };

            match attempt {
                Ok(()) => return Ok(()),
                Err(e) => tracing::warn!("Reconnect attempt failed: {}", e),
            }
        }
    }

    /// Run until `cancel` fires
    ///
    /// In auto mode local clipboard changes are pushed as they happen. When
    /// `triggers` is given, uploads and downloads are also served on
    /// request.
    pub async fn run(
        self: Arc<Self>,
        cancel: CancellationToken,
        triggers: Option<mpsc::Receiver<Trigger>>,
    ) {
        let mut tasks = Vec::new();
        if self.config.mode == SyncMode::Auto {
            tasks.push(tokio::spawn(
                Arc::clone(&self).watch_clipboard(cancel.clone()),
            ));
        }
        if let Some(triggers) = triggers {
            tasks.push(tokio::spawn(
                Arc::clone(&self).handle_triggers(triggers, cancel.clone()),
            ));
        }

        let initial = tokio::select! {
            _ = cancel.cancelled() => Err(ConnectError::Cancelled),
            result = self.connect() => result,
        };
        if let Err(e) = initial {
            tracing::warn!("Initial connection failed: {}", e);
        }

        while !cancel.is_cancelled() {
            if self.state().is_connected() {
                self.run_link(&cancel).await;
                if cancel.is_cancelled() {
                    break;
                }
            }

            self.set_state(ConnectorState::Reconnecting);
            if self.reconnect(&cancel).await.is_err() {
                break;
            }
        }

        self.shutdown().await;
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Send `terminate` and close the link, best-effort
    pub async fn shutdown(&self) {
        let write_timeout = self.config.write_timeout;

        if let Some(mut sink) = self.sink.lock().await.take() {
            let terminate = WireMessage::terminate(self.id());
            if let Ok(Err(e)) =
                timeout(write_timeout, sink.send(Message::Text(encode_text(&terminate)))).await
            {
                tracing::debug!("Failed to send terminate: {}", e);
            }
            let _ = timeout(write_timeout, sink.close()).await;
            tracing::info!("Disconnected from relay");
        }
        self.source.lock().await.take();

        self.set_state(ConnectorState::Disconnected);
    }

    /// Serve one established link until either side fails or `cancel` fires
    async fn run_link(&self, cancel: &CancellationToken) {
        let link = cancel.child_token();
        let (read_result, write_result) = tokio::join!(self.read_loop(&link), self.write_loop(&link));

        if let Err(e) = read_result {
            tracing::warn!("Link read side ended: {}", e);
        }
        if let Err(e) = write_result {
            tracing::warn!("Link write side ended: {}", e);
        }

        // On shutdown the sink stays for the terminate notice.
        if !cancel.is_cancelled() {
            self.sink.lock().await.take();
            self.source.lock().await.take();
        }
    }

    async fn read_loop(&self, link: &CancellationToken) -> Result<(), ConnectError> {
        let Some(mut source) = self.source.lock().await.take() else {
            link.cancel();
            return Err(ConnectError::NotConnected);
        };
        let read_timeout = self.config.read_timeout;

        let result = loop {
            let next = tokio::select! {
                _ = link.cancelled() => break Ok(()),
                next = timeout(read_timeout, source.next()) => next,
            };

            let message = match next {
                Err(_) => break Err(ConnectError::ReadTimeout(read_timeout)),
                Ok(None) => break Err(ConnectError::ConnectionClosed),
                Ok(Some(Err(e))) => break Err(e.into()),
                Ok(Some(Ok(message))) => message,
            };

            let payload = match message {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(data) => data,
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                Message::Close(_) => break Err(ConnectError::ConnectionClosed),
            };

            match decode(&payload) {
                Ok(WireMessage::ClipboardChanged { user_id, data }) => {
                    self.apply_remote(&user_id, data).await;
                }
                Ok(other) => {
                    tracing::debug!("Ignoring '{}' from relay", other.action());
                }
                Err(e) => tracing::warn!("Dropped undecodable frame from relay: {}", e),
            }
        };

        link.cancel();
        result
    }

    async fn write_loop(&self, link: &CancellationToken) -> Result<(), ConnectError> {
        let mut rx = self.outbound_rx.lock().await;

        let result = loop {
            let message = tokio::select! {
                _ = link.cancelled() => break Ok(()),
                next = rx.recv() => match next {
                    Some(message) => message,
                    None => break Ok(()),
                },
            };

            if let Err(e) = self.send_frame(Message::Text(encode_text(&message))).await {
                tracing::warn!("Failed to send '{}': {}", message.action(), e);
                break Err(e);
            }
        };

        link.cancel();
        result
    }

    async fn send_frame(&self, frame: Message) -> Result<(), ConnectError> {
        let write_timeout = self.config.write_timeout;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(ConnectError::NotConnected)?;

        timeout(write_timeout, sink.send(frame))
            .await
            .map_err(|_| ConnectError::WriteTimeout(write_timeout))?
            .map_err(ConnectError::Transport)
    }

    async fn apply_remote(&self, from: &str, data: Bytes) {
        tracing::debug!("{} bytes of clipboard from {}", data.len(), from);

        *lock(&self.last_synced) = Some(data.clone());
        if let Err(e) = self.clipboard.write(data).await {
            tracing::warn!("Failed to apply clipboard from {}: {}", from, e);
        }
    }

    /// Queue a clipboard change for the relay; `false` if it was dropped
    ///
    /// Content whose frame would exceed the relay's limit is dropped here;
    /// the relay would close the link over it.
    fn enqueue(&self, data: Bytes) -> bool {
        let message = WireMessage::clipboard_changed(self.id(), data.clone());

        let frame_len = encode_text(&message).len();
        if frame_len > MAX_MESSAGE_SIZE {
            tracing::warn!(
                "Clipboard change of {} bytes is {} bytes on the wire (limit {}), not sent",
                data.len(),
                frame_len,
                MAX_MESSAGE_SIZE
            );
            return false;
        }

        match self.outbound_tx.try_send(message) {
            Ok(()) => {
                *lock(&self.last_synced) = Some(data);
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Outbound queue full, dropping clipboard change");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    async fn watch_clipboard(self: Arc<Self>, cancel: CancellationToken) {
        let mut changes = self.clipboard.watch(cancel);

        while let Some(data) = changes.recv().await {
            if lock(&self.last_synced).as_ref() == Some(&data) {
                tracing::debug!("Skipping clipboard change already on the relay");
                continue;
            }
            if self.enqueue(data) {
                tracing::debug!("Queued local clipboard change");
            }
        }
    }

    async fn handle_triggers(
        self: Arc<Self>,
        mut triggers: mpsc::Receiver<Trigger>,
        cancel: CancellationToken,
    ) {
        loop {
            let trigger = tokio::select! {
                _ = cancel.cancelled() => break,
                next = triggers.recv() => match next {
                    Some(trigger) => trigger,
                    None => break,
                },
            };

            if let Err(e) = self.handle_trigger(trigger).await {
                tracing::warn!("Clipboard {} failed: {}", trigger, e);
            }
        }
    }

    /// Serve one manual upload or download
    pub async fn handle_trigger(&self, trigger: Trigger) -> Result<(), ConnectError> {
        match trigger {
            Trigger::Upload => match self.clipboard.read().await? {
                Some(data) => {
                    let len = data.len();
                    if self.enqueue(data) {
                        tracing::info!("Uploading {} bytes of clipboard", len);
                    }
                }
                None => tracing::info!("Clipboard is empty, nothing to upload"),
            },
            Trigger::Download => match self.remote.fetch().await? {
                Some(data) => {
                    tracing::info!("Downloaded {} bytes of clipboard", data.len());
                    *lock(&self.last_synced) = Some(data.clone());
                    self.clipboard.write(data).await?;
                }
                None => tracing::info!("Relay has no clipboard content yet"),
            },
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
