//! Local clipboard access
//!
//! The connector only needs three things from the platform: read the
//! current content, write new content, and a stream of changes. Changes are
//! detected by polling, which works the same on every platform.

mod system;

pub use system::SystemClipboard;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Buffer between the poller and the consumer of changes
const WATCH_CHANNEL_CAPACITY: usize = 16;

/// Clipboard access errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// The platform clipboard could not be opened
    #[error("Clipboard unavailable: {0}")]
    Unavailable(String),

    /// A read or write failed
    #[error("Clipboard operation failed: {0}")]
    Operation(String),
}

/// Local clipboard collaborator
#[async_trait]
pub trait Clipboard: Send + Sync + 'static {
    /// Current content, `None` when empty
    async fn read(&self) -> Result<Option<Bytes>, ClipboardError>;

    /// Replace the content
    async fn write(&self, data: Bytes) -> Result<(), ClipboardError>;

    /// Stream of content changes; closed on cancellation
    fn watch(&self, cancel: CancellationToken) -> mpsc::Receiver<Bytes>;
}

/// Poll `clipboard` every `interval` and report each new value
///
/// Content present when polling starts is not reported.
pub fn poll_changes<C>(
    clipboard: C,
    interval: Duration,
    cancel: CancellationToken,
) -> mpsc::Receiver<Bytes>
where
    C: Clipboard + Clone,
{
    let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut last = clipboard.read().await.ok().flatten();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match clipboard.read().await {
                Ok(Some(data)) if last.as_ref() != Some(&data) => {
                    last = Some(data.clone());
                    if tx.send(data).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Clipboard poll failed: {}", e),
            }
        }

        tracing::debug!("Clipboard watch stopped");
    });

    rx
}

/// Process-local clipboard
///
/// Used by headless clients and tests. `set` stands in for a user copying
/// something.
#[derive(Debug, Clone)]
pub struct MemoryClipboard {
    content: Arc<Mutex<Option<Bytes>>>,
    poll_interval: Duration,
}

impl MemoryClipboard {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            content: Arc::new(Mutex::new(None)),
            poll_interval,
        }
    }

    /// Replace the content as a local user would
    pub fn set(&self, data: impl Into<Bytes>) {
        *self.lock() = Some(data.into());
    }

    /// Current content
    pub fn get(&self) -> Option<Bytes> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Bytes>> {
        self.content.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Clipboard for MemoryClipboard {
    async fn read(&self) -> Result<Option<Bytes>, ClipboardError> {
        Ok(self.get().filter(|data| !data.is_empty()))
    }

    async fn write(&self, data: Bytes) -> Result<(), ClipboardError> {
        self.set(data);
        Ok(())
    }

    fn watch(&self, cancel: CancellationToken) -> mpsc::Receiver<Bytes> {
        poll_changes(self.clone(), self.poll_interval, cancel)
    }
}
