//! cr-client: device client for clipboard-remote
//!
//! Keeps one WebSocket link to the relay, pushes local clipboard changes
//! and applies changes made on the user's other devices.

pub mod clipboard;
pub mod connector;
pub mod reconnect;
pub mod remote;
pub mod trigger;

pub use clipboard::{Clipboard, ClipboardError, MemoryClipboard, SystemClipboard};
pub use connector::{ConnectError, Connector, ConnectorState};
pub use reconnect::ExponentialBackoff;
pub use remote::{RemoteClipboard, RemoteError};
pub use trigger::Trigger;
