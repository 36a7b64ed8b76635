//! Session router
//!
//! The router is the only owner of the registry `username -> sessions`. All
//! changes and all fan-out go through one event loop fed by three request
//! channels (register, unregister, broadcast), so requests are applied one
//! at a time and no lock guards the registry.
//!
//! # Queue ownership
//!
//! A registered session hands the sending side of its outbound queue to the
//! router. Removing a session from the registry drops that sender, which
//! closes the queue, and cancels the session's token so its reader stops
//! too, even while queued frames are still draining.
//!
//! # Backpressure
//!
//! Broadcast never blocks. A sibling whose queue is full (or already
//! closed) is unregistered on the spot and the remaining siblings still get
//! the message.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use cr_protocol::{SyncMode, WireMessage};

/// Process-unique key of a session
///
/// Device ids can collide or be renamed; the key always identifies exactly
/// one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey(u64);

impl SessionKey {
    /// Allocate the next key
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Routing handle of an authenticated session
#[derive(Debug)]
pub struct SessionHandle {
    pub key: SessionKey,
    /// Requested device id; replaced by the assigned id on registration
    pub id: String,
    pub username: String,
    pub mode: SyncMode,
    tx: mpsc::Sender<WireMessage>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(
        key: SessionKey,
        id: impl Into<String>,
        username: impl Into<String>,
        mode: SyncMode,
        tx: mpsc::Sender<WireMessage>,
    ) -> Self {
        Self {
            key,
            id: id.into(),
            username: username.into(),
            mode,
            tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Token cancelled when the router drops this session
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Routing envelope submitted for fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedMessage {
    /// Device the content came from; it never gets its own message back
    pub sender_id: String,
    pub username: String,
    pub payload: Bytes,
}

impl RoutedMessage {
    pub fn new(sender_id: impl Into<String>, username: impl Into<String>, payload: Bytes) -> Self {
        Self {
            sender_id: sender_id.into(),
            username: username.into(),
            payload,
        }
    }
}

/// Errors returned by [`RouterHandle`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// The router loop has stopped
    #[error("Router is not running")]
    Closed,

    /// The session's queue was closed before registration finished
    #[error("Session queue closed during registration")]
    SessionGone,
}

struct RegisterRequest {
    handle: SessionHandle,
    reply: oneshot::Sender<Result<String, RouterError>>,
}

/// Cloneable front of the router loop
#[derive(Clone)]
pub struct RouterHandle {
    register_tx: mpsc::Sender<RegisterRequest>,
    unregister_tx: mpsc::Sender<SessionKey>,
    broadcast_tx: mpsc::Sender<RoutedMessage>,
}

impl RouterHandle {
    /// Register a session and return its assigned device id
    ///
    /// The `ready` reply is already on the session's queue when this returns,
    /// ahead of any broadcast.
    pub async fn register(&self, handle: SessionHandle) -> Result<String, RouterError> {
        let (reply, rx) = oneshot::channel();
        self.register_tx
            .send(RegisterRequest { handle, reply })
            .await
            .map_err(|_| RouterError::Closed)?;
        rx.await.map_err(|_| RouterError::Closed)?
    }

    /// Remove a session; removing an unknown session is a no-op
    pub async fn unregister(&self, key: SessionKey) -> Result<(), RouterError> {
        self.unregister_tx
            .send(key)
            .await
            .map_err(|_| RouterError::Closed)
    }

    /// Fan a message out to the sender's siblings
    pub async fn broadcast(&self, message: RoutedMessage) -> Result<(), RouterError> {
        self.broadcast_tx
            .send(message)
            .await
            .map_err(|_| RouterError::Closed)
    }
}

/// Router event loop
pub struct Router {
    sessions: HashMap<String, Vec<SessionHandle>>,
    /// Which username a key is registered under
    owners: HashMap<SessionKey, String>,
    register_rx: mpsc::Receiver<RegisterRequest>,
    unregister_rx: mpsc::Receiver<SessionKey>,
    broadcast_rx: mpsc::Receiver<RoutedMessage>,
}

impl Router {
    /// Create a router and its handle; each request channel holds `capacity`
    pub fn new(capacity: usize) -> (Self, RouterHandle) {
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);

        let router = Self {
            sessions: HashMap::new(),
            owners: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
        };
        let handle = RouterHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
        };
        (router, handle)
    }

    /// Spawn the loop on the current runtime
    pub fn spawn(
        capacity: usize,
        cancel: CancellationToken,
    ) -> (RouterHandle, tokio::task::JoinHandle<()>) {
        let (router, handle) = Self::new(capacity);
        let task = tokio::spawn(router.run(cancel));
        (handle, task)
    }

    /// Run until cancelled or until every handle is dropped
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::debug!("Router started");

        loop {
            // Fixed priority: a caller that unregisters and then registers
            // sees its requests applied in that order.
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("Router cancelled");
                    break;
                }

                Some(key) = self.unregister_rx.recv() => {
                    self.unregister(key);
                }

                request = self.register_rx.recv() => {
                    // All three senders live in the handle, so one closed
                    // channel means every handle is gone.
                    let Some(request) = request else { break };
                    let result = self.register(request.handle);
                    let _ = request.reply.send(result);
                }

                Some(message) = self.broadcast_rx.recv() => {
                    self.broadcast(message);
                }
            }
        }

        // Dropping the registry closes every remaining session queue.
        let remaining = self.owners.len();
        self.sessions.clear();
        self.owners.clear();
        tracing::debug!("Router stopped ({} sessions released)", remaining);
    }

    fn register(&mut self, mut handle: SessionHandle) -> Result<String, RouterError> {
        let id = self.assign_id(&handle.id);

        handle
            .tx
            .try_send(WireMessage::Ready {
                user_id: id.clone(),
            })
            .map_err(|_| RouterError::SessionGone)?;

        if id != handle.id {
            tracing::info!("Device id '{}' in use, assigned '{}'", handle.id, id);
        }
        handle.id = id.clone();

        tracing::info!(
            "Registered {} ({}) for user {} [{}]",
            handle.id,
            handle.key,
            handle.username,
            handle.mode
        );

        self.owners.insert(handle.key, handle.username.clone());
        self.sessions
            .entry(handle.username.clone())
            .or_default()
            .push(handle);

        Ok(id)
    }

    fn unregister(&mut self, key: SessionKey) {
        let Some(username) = self.owners.remove(&key) else {
            return;
        };

        if let Some(list) = self.sessions.get_mut(&username) {
            if let Some(pos) = list.iter().position(|s| s.key == key) {
                let handle = list.remove(pos);
                handle.cancel.cancel();
                tracing::info!("Unregistered {} ({}) for user {}", handle.id, key, username);
            }
            if list.is_empty() {
                self.sessions.remove(&username);
            }
        }
    }

    fn broadcast(&mut self, message: RoutedMessage) {
        let Some(list) = self.sessions.get(&message.username) else {
            tracing::debug!("No sessions for user {}", message.username);
            return;
        };

        let frame = WireMessage::ClipboardChanged {
            user_id: message.sender_id.clone(),
            data: message.payload,
        };

        let mut dropped = Vec::new();
        let mut delivered = 0usize;
        for session in list.iter().filter(|s| s.id != message.sender_id) {
            match session.tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        "Session {} ({}) is too slow, dropping it",
                        session.id,
                        session.key
                    );
                    dropped.push(session.key);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("Session {} ({}) already closed", session.id, session.key);
                    dropped.push(session.key);
                }
            }
        }

        tracing::debug!(
            "Broadcast from {} to {} sibling(s) of {}",
            message.sender_id,
            delivered,
            message.username
        );

        for key in dropped {
            self.unregister(key);
        }
    }

    /// Pick a device id that no live session uses
    fn assign_id(&self, requested: &str) -> String {
        if requested.is_empty() {
            return uuid::Uuid::new_v4().to_string();
        }
        if !self.id_in_use(requested) {
            return requested.to_string();
        }

        (2u64..)
            .map(|n| format!("{}-{}", requested, n))
            .find(|candidate| !self.id_in_use(candidate))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    fn id_in_use(&self, id: &str) -> bool {
        self.sessions.values().flatten().any(|s| s.id == id)
    }
}
