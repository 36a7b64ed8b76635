//! Shared relay server state

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use cr_core::config::ServerConfig;
use cr_core::error::StoreError;
use cr_core::{ContentStore, CredentialStore, MemoryStore, SqliteStore};

use crate::router::RouterHandle;

/// State shared by every session and request handler
pub struct ServerState {
    /// Configuration
    pub config: ServerConfig,
    /// Front of the router loop
    pub router: RouterHandle,
    /// Latest clipboard content
    pub content: Arc<dyn ContentStore>,
    /// Account credentials
    pub credentials: Arc<dyn CredentialStore>,
    /// Cancelled on server shutdown; sessions use child tokens
    pub shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        router: RouterHandle,
        content: Arc<dyn ContentStore>,
        credentials: Arc<dyn CredentialStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            router,
            content,
            credentials,
            shutdown,
        }
    }

    /// State backed by one [`MemoryStore`] seeded from `config.auths`
    pub fn with_memory_store(
        config: ServerConfig,
        router: RouterHandle,
        shutdown: CancellationToken,
    ) -> Self {
        let store = Arc::new(MemoryStore::with_users(config.auths.iter().cloned()));
        Self::new(config, router, store.clone(), store, shutdown)
    }

    /// State backed by the store `config.database_path` selects
    ///
    /// With a path, content and accounts live in a [`SqliteStore`] and
    /// `config.auths` is written into it; without one this is
    /// [`with_memory_store`](Self::with_memory_store).
    pub fn from_config(
        config: ServerConfig,
        router: RouterHandle,
        shutdown: CancellationToken,
    ) -> Result<Self, StoreError> {
        let Some(path) = config.database_path.clone() else {
            return Ok(Self::with_memory_store(config, router, shutdown));
        };

        let store = Arc::new(SqliteStore::open(&path)?);
        store.add_users(config.auths.iter().cloned())?;
        Ok(Self::new(config, router, store.clone(), store, shutdown))
    }
}
