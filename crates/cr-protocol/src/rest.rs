//! REST clipboard envelopes
//!
//! Shared by the relay's `/clipboard/get` and `/clipboard/set` handlers and
//! the device-side pull client.

use serde::{Deserialize, Serialize};

/// Response envelope: `{"code", "message", "data"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespInfo {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataInfo>,
}

/// Clipboard content carried in a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataInfo {
    /// Content kind; only `"text"` is produced
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

impl DataInfo {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            content: content.into(),
        }
    }
}

/// Body of `POST /clipboard/set`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRequest {
    /// Device the content is attributed to; it is skipped by the fan-out
    #[serde(default)]
    pub client_id: String,
    pub content: String,
}
