//! Manual-mode triggers

use std::fmt;
use std::str::FromStr;

/// Explicit clipboard request from the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Send the local clipboard to the relay
    Upload,
    /// Replace the local clipboard with the user's latest stored content
    Download,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Upload => write!(f, "upload"),
            Trigger::Download => write!(f, "download"),
        }
    }
}

impl FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" | "upload" => Ok(Trigger::Upload),
            "pull" | "download" => Ok(Trigger::Download),
            other => Err(format!("unknown trigger '{}' (expected push or pull)", other)),
        }
    }
}
