//! Configuration management for clipboard-remote

mod client;
pub mod serde_utils;
mod server;

pub use client::{AuthConfig, BackoffConfig, ClientConfig};
pub use server::{ServerConfig, UserEntry};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clipboard-remote")
}

/// Default path of the relay server configuration
pub fn default_server_config_path() -> PathBuf {
    default_config_dir().join("server.toml")
}

/// Default path of the device client configuration
pub fn default_client_config_path() -> PathBuf {
    default_config_dir().join("client.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    tracing::debug!("Loaded configuration from {:?}", path);
    Ok(config)
}
