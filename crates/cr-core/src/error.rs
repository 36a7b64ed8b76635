//! Core error types for clipboard-remote

use std::path::PathBuf;
use thiserror::Error;

/// Handshake authentication errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    /// No such user in the credential store
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// Presented hash is not `salt$digest` hex
    #[error("Malformed password hash")]
    MalformedHash,

    /// Digest does not match the stored credential
    #[error("Password mismatch for user {0}")]
    Mismatch(String),
}

/// Content or credential store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend is unavailable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// SQLite backend error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
