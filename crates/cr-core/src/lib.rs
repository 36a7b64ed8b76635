//! cr-core: Core abstractions and configuration for clipboard-remote
//!
//! This crate provides the shared types, collaborator traits (content and
//! credential stores), credential hashing and configuration structures used
//! by the relay server and the device client.

pub mod auth;
pub mod config;
pub mod error;
pub mod store;
pub mod time;
pub mod types;

pub use store::{ClipRecord, ContentStore, CredentialStore, MemoryStore, SqliteStore};
pub use types::ConnectionStatus;
