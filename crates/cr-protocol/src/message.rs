//! Message types for the clipboard-remote protocol
//!
//! # Message Flow
//!
//! 1. Device connects and sends `Register` carrying its credentials
//! 2. Server validates them and replies `Ready` with the id it assigned
//! 3. `ClipboardChanged` flows in both directions
//! 4. Device sends `Terminate` before it disconnects on purpose
//!
//! A server that rejects the credentials closes the link without `Ready`.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Largest frame a peer may send (10 MiB)
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Action tag carried in the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Handshake request (device -> server)
    Register,
    /// Handshake acknowledgment (server -> device)
    Ready,
    /// Clipboard content changed
    ClipboardChanged,
    /// Graceful disconnect notice (device -> server)
    Terminate,
}

impl Action {
    /// Tag used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Register => "register",
            Action::Ready => "ready",
            Action::ClipboardChanged => "cbchanged",
            Action::Terminate => "terminate",
        }
    }

    /// Parse a wire tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "register" => Some(Action::Register),
            "ready" => Some(Action::Ready),
            "cbchanged" => Some(Action::ClipboardChanged),
            "terminate" => Some(Action::Terminate),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a device pushes its clipboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Every local clipboard change is pushed
    #[default]
    Auto,
    /// Pushes and pulls happen on explicit request
    Manual,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Auto => "auto",
            SyncMode::Manual => "manual",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(SyncMode::Auto),
            "manual" => Ok(SyncMode::Manual),
            other => Err(DecodeError::InvalidCredentials(format!(
                "unknown mode '{}'",
                other
            ))),
        }
    }
}

/// Credential triple sent with `Register`
///
/// Rendered on the wire as `username:passwordHash:mode`. Neither the
/// username nor the hash may contain `:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    /// Salted digest of the password, never the password itself
    pub password_hash: String,
    pub mode: SyncMode,
}

impl Credentials {
    /// Build credentials that survive the `:`-separated payload
    pub fn new(
        username: impl Into<String>,
        password_hash: impl Into<String>,
        mode: SyncMode,
    ) -> Result<Self, DecodeError> {
        let username = username.into();
        let password_hash = password_hash.into();
        validate_username(&username)?;
        if password_hash.contains(':') {
            return Err(DecodeError::InvalidCredentials(
                "password hash contains ':'".to_string(),
            ));
        }

        Ok(Self {
            username,
            password_hash,
            mode,
        })
    }

    /// Render as the `register` payload
    pub fn to_payload(&self) -> String {
        format!("{}:{}:{}", self.username, self.password_hash, self.mode)
    }

    /// Parse a `register` payload
    pub fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| DecodeError::InvalidCredentials("payload is not UTF-8".to_string()))?;

        let parts: Vec<&str> = text.split(':').collect();
        let [username, password_hash, mode] = parts.as_slice() else {
            return Err(DecodeError::InvalidCredentials(format!(
                "expected 3 fields, got {}",
                parts.len()
            )));
        };

        validate_username(username)?;

        Ok(Self {
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            mode: mode.parse()?,
        })
    }
}

/// Check that `username` can be carried in a `register` payload
pub fn validate_username(username: &str) -> Result<(), DecodeError> {
    if username.is_empty() {
        return Err(DecodeError::InvalidCredentials("empty username".to_string()));
    }
    if username.contains(':') {
        return Err(DecodeError::InvalidCredentials(format!(
            "username '{}' contains ':'",
            username
        )));
    }
    Ok(())
}

/// Protocol messages
///
/// `user_id` is the device identifier of the originating device. For
/// `Ready` it is the id the server assigned, which may differ from the one
/// requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Handshake request
    Register {
        user_id: String,
        credentials: Credentials,
    },

    /// Handshake acknowledgment
    Ready { user_id: String },

    /// Clipboard content
    ClipboardChanged { user_id: String, data: Bytes },

    /// Device is going away
    Terminate { user_id: String },
}

impl WireMessage {
    /// Get the action tag for this message
    pub fn action(&self) -> Action {
        match self {
            WireMessage::Register { .. } => Action::Register,
            WireMessage::Ready { .. } => Action::Ready,
            WireMessage::ClipboardChanged { .. } => Action::ClipboardChanged,
            WireMessage::Terminate { .. } => Action::Terminate,
        }
    }

    /// Device id carried by the message
    pub fn user_id(&self) -> &str {
        match self {
            WireMessage::Register { user_id, .. }
            | WireMessage::Ready { user_id }
            | WireMessage::ClipboardChanged { user_id, .. }
            | WireMessage::Terminate { user_id } => user_id,
        }
    }

    pub fn clipboard_changed(user_id: impl Into<String>, data: impl Into<Bytes>) -> Self {
        WireMessage::ClipboardChanged {
            user_id: user_id.into(),
            data: data.into(),
        }
    }

    pub fn terminate(user_id: impl Into<String>) -> Self {
        WireMessage::Terminate {
            user_id: user_id.into(),
        }
    }
}
