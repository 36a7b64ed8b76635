//! Platform clipboard via `arboard`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{poll_changes, Clipboard, ClipboardError};

/// Text clipboard of the desktop session
///
/// The `arboard` handle is kept for the life of the client; on X11 the
/// content we set disappears when the handle is dropped.
#[derive(Clone)]
pub struct SystemClipboard {
    inner: Arc<Mutex<arboard::Clipboard>>,
    poll_interval: Duration,
}

impl SystemClipboard {
    pub fn new(poll_interval: Duration) -> Result<Self, ClipboardError> {
        let inner =
            arboard::Clipboard::new().map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
            poll_interval,
        })
    }

    async fn with_clipboard<T, F>(&self, f: F) -> Result<T, ClipboardError>
    where
        T: Send + 'static,
        F: FnOnce(&mut arboard::Clipboard) -> Result<T, arboard::Error> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut clipboard = inner.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut clipboard)
        })
        .await
        .map_err(|e| ClipboardError::Operation(e.to_string()))?
        .map_err(|e| ClipboardError::Operation(e.to_string()))
    }
}

#[async_trait]
impl Clipboard for SystemClipboard {
    async fn read(&self) -> Result<Option<Bytes>, ClipboardError> {
        self.with_clipboard(|clipboard| match clipboard.get_text() {
            Ok(text) if text.is_empty() => Ok(None),
            Ok(text) => Ok(Some(Bytes::from(text.into_bytes()))),
            // Images and other non-text content count as empty.
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn write(&self, data: Bytes) -> Result<(), ClipboardError> {
        let text = String::from_utf8_lossy(&data).into_owned();
        self.with_clipboard(move |clipboard| clipboard.set_text(text))
            .await
    }

    fn watch(&self, cancel: CancellationToken) -> mpsc::Receiver<Bytes> {
        poll_changes(self.clone(), self.poll_interval, cancel)
    }
}
