//! Protocol error types

use thiserror::Error;

/// Errors that can occur while decoding a wire message
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Frame is not a valid envelope
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Envelope carries an action this protocol does not know
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Register payload is not a `username:passwordHash:mode` triple
    #[error("Invalid credentials payload: {0}")]
    InvalidCredentials(String),

    /// Payload exceeds maximum size
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    TooLarge { size: usize, max: usize },
}
