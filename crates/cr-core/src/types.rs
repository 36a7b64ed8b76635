//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Link status of a device connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// No link; initial state and final state after shutdown
    Disconnected,
    /// Opening the transport and running the handshake
    Connecting,
    /// Handshake done, clipboard traffic flowing
    Connected,
    /// Link lost, retrying on the backoff schedule
    Reconnecting,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Reconnecting => write!(f, "reconnecting"),
        }
    }
}
