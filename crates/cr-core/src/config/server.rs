//! Relay server configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use cr_protocol::MAX_MESSAGE_SIZE;

/// Configuration for the relay server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to
    pub bind_address: String,

    /// Path devices open their WebSocket on
    pub websocket_path: String,

    /// Largest accepted frame in bytes
    pub max_message_size: usize,

    /// Idle bound on a session read; refreshed by every frame and pong
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,

    /// Bound on a single frame write
    #[serde(with = "duration_secs")]
    pub write_timeout: Duration,

    /// Interval between server pings, must be below `read_timeout`
    #[serde(with = "duration_secs")]
    pub ping_period: Duration,

    /// How long an unauthenticated peer has to send `register`
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,

    /// Outbound queue capacity per session
    pub session_queue_capacity: usize,

    /// Capacity of each router request channel
    pub router_queue_capacity: usize,

    /// Accounts allowed to connect
    pub auths: Vec<UserEntry>,

    /// SQLite database for content and accounts; in-memory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9317".to_string(),
            websocket_path: "/websocket".to_string(),
            max_message_size: MAX_MESSAGE_SIZE,
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            ping_period: Duration::from_secs(54),
            handshake_timeout: Duration::from_secs(10),
            session_queue_capacity: 256,
            router_queue_capacity: 256,
            auths: Vec::new(),
            database_path: None,
        }
    }
}

impl ServerConfig {
    /// Check settings that would make sessions misbehave
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        use crate::error::ConfigError;

        if self.ping_period >= self.read_timeout {
            return Err(ConfigError::Invalid(format!(
                "ping_period ({:?}) must be shorter than read_timeout ({:?})",
                self.ping_period, self.read_timeout
            )));
        }
        if self.session_queue_capacity == 0 || self.router_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue capacities must be non-zero".to_string(),
            ));
        }
        if !self.websocket_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "websocket_path must start with '/': {}",
                self.websocket_path
            )));
        }
        Ok(())
    }
}

/// One account in the `auths` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub user: String,
    pub password: String,
}

impl UserEntry {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}
