//! Content and credential stores
//!
//! The relay persists only the latest clipboard value. [`MemoryStore`] keeps
//! two independent indexes, one by device id and one by username; each
//! lookup returns the most recent write for its key. [`SqliteStore`] answers
//! the same lookups from a database file that survives restarts.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::UserEntry;
use crate::error::StoreError;
use crate::time::current_time_millis;

/// Latest clipboard content written by a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRecord {
    pub device_id: String,
    pub username: String,
    pub content: Bytes,
    pub timestamp_ms: u64,
}

/// Persisted clipboard content
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Record content written by `device_id` of `username`
    async fn insert_clip_content(
        &self,
        device_id: &str,
        username: &str,
        content: Bytes,
    ) -> Result<(), StoreError>;

    /// Latest content written by a device
    async fn clip_content_by_id(&self, device_id: &str) -> Result<Option<ClipRecord>, StoreError>;

    /// Latest content written by any device of a user
    async fn clip_content_by_username(
        &self,
        username: &str,
    ) -> Result<Option<ClipRecord>, StoreError>;
}

/// Stored account credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// The stored credential the handshake digest is computed over
    async fn password_hash(&self, username: &str) -> Result<Option<String>, StoreError>;
}

/// In-memory implementation of both stores
#[derive(Debug, Default)]
pub struct MemoryStore {
    by_device: DashMap<String, ClipRecord>,
    by_user: DashMap<String, ClipRecord>,
    users: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with the given accounts
    pub fn with_users(users: impl IntoIterator<Item = UserEntry>) -> Self {
        let store = Self::new();
        for entry in users {
            store.add_user(entry);
        }
        store
    }

    /// Add or replace an account
    pub fn add_user(&self, entry: UserEntry) {
        self.users.insert(entry.user, entry.password);
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn insert_clip_content(
        &self,
        device_id: &str,
        username: &str,
        content: Bytes,
    ) -> Result<(), StoreError> {
        let record = ClipRecord {
            device_id: device_id.to_string(),
            username: username.to_string(),
            content,
            timestamp_ms: current_time_millis(),
        };

        self.by_user.insert(username.to_string(), record.clone());
        self.by_device.insert(device_id.to_string(), record);
        Ok(())
    }

    async fn clip_content_by_id(&self, device_id: &str) -> Result<Option<ClipRecord>, StoreError> {
        Ok(self.by_device.get(device_id).map(|r| r.value().clone()))
    }

    async fn clip_content_by_username(
        &self,
        username: &str,
    ) -> Result<Option<ClipRecord>, StoreError> {
        Ok(self.by_user.get(username).map(|r| r.value().clone()))
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn password_hash(&self, username: &str) -> Result<Option<String>, StoreError> {
        Ok(self.users.get(username).map(|p| p.value().clone()))
    }
}
