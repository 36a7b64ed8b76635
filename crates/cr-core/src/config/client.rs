//! Device client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::error::ConfigError;
use cr_protocol::SyncMode;

/// Configuration for a device client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay address as `host:port`
    pub server_address: String,

    /// WebSocket path on the relay
    pub websocket_path: String,

    /// Use `wss://` and `https://` instead of plain schemes
    pub use_tls: bool,

    /// Device identifier (defaults to the host name)
    pub device_id: Option<String>,

    /// Account credentials
    pub auth: AuthConfig,

    /// Push every change (`auto`) or only on request (`manual`)
    pub mode: SyncMode,

    /// Bound on the register/ready exchange
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,

    /// Idle bound on a read; server pings keep it alive
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,

    /// Bound on a single frame write
    #[serde(with = "duration_secs")]
    pub write_timeout: Duration,

    /// Outbound queue capacity
    pub outbound_queue_capacity: usize,

    /// How often the system clipboard is polled for changes
    #[serde(rename = "poll_interval_ms", with = "duration_millis")]
    pub poll_interval: Duration,

    /// Reconnect policy
    pub backoff: BackoffConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "localhost:9317".to_string(),
            websocket_path: "/websocket".to_string(),
            use_tls: false,
            device_id: None,
            auth: AuthConfig::default(),
            mode: SyncMode::Auto,
            handshake_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            outbound_queue_capacity: 10,
            poll_interval: Duration::from_millis(500),
            backoff: BackoffConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Check settings the relay would reject on every attempt
    pub fn validate(&self) -> Result<(), ConfigError> {
        cr_protocol::validate_username(&self.auth.user)
            .map_err(|e| ConfigError::Invalid(format!("auth.user: {}", e)))?;
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "outbound_queue_capacity must be non-zero".to_string(),
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

    /// Device id, falling back to the host name and then a random UUID
    pub fn device_id(&self) -> String {
        if let Some(id) = self.device_id.as_ref().filter(|id| !id.is_empty()) {
            return id.clone();
        }

        let host = gethostname::gethostname().to_string_lossy().into_owned();
        if host.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            host
        }
    }

    /// WebSocket URL of the relay
    pub fn websocket_url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{}://{}{}", scheme, self.server_address, self.websocket_path)
    }

    /// Base URL of the relay's REST endpoints
    pub fn http_base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}", scheme, self.server_address)
    }
}

/// Account credentials of a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub user: String,
    pub password: String,
}

/// Reconnect backoff configuration
///
/// The defaults retry at a fixed 10 second interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(10),
            max: Duration::from_secs(10),
            multiplier: 1.0,
            jitter: 0.0,
        }
    }
}
