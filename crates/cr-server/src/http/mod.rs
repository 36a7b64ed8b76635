//! HTTP front of the relay
//!
//! One axum listener serves the device WebSocket and the REST clipboard
//! endpoints.

mod rest;
mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use cr_core::config::ServerConfig;
use cr_core::error::StoreError;
use cr_core::{ContentStore, CredentialStore};

use crate::router::Router;
use crate::state::ServerState;

/// Build the axum application
pub fn app(state: Arc<ServerState>) -> axum::Router {
    axum::Router::new()
        .route(&state.config.websocket_path, get(ws::upgrade))
        .route("/clipboard/get", get(rest::get_clipboard))
        .route("/clipboard/set", post(rest::set_clipboard))
        .route("/health", get(rest::health))
        .with_state(state)
}

/// Relay server: router loop plus HTTP listener
pub struct RelayServer {
    state: Arc<ServerState>,
    router_task: JoinHandle<()>,
}

impl RelayServer {
    /// Create a server over the given stores and start its router
    pub fn new(
        config: ServerConfig,
        content: Arc<dyn ContentStore>,
        credentials: Arc<dyn CredentialStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let (router, router_task) = Router::spawn(config.router_queue_capacity, shutdown.clone());
        let state = ServerState::new(config, router, content, credentials, shutdown);
        Self {
            state: Arc::new(state),
            router_task,
        }
    }

    /// Create a server backed by an in-memory store seeded from `config.auths`
    pub fn with_memory_store(config: ServerConfig, shutdown: CancellationToken) -> Self {
        let (router, router_task) = Router::spawn(config.router_queue_capacity, shutdown.clone());
        let state = ServerState::with_memory_store(config, router, shutdown);
        Self {
            state: Arc::new(state),
            router_task,
        }
    }

    /// Create a server over the store `config.database_path` selects
    pub fn from_config(
        config: ServerConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, StoreError> {
        let (router, router_task) = Router::spawn(config.router_queue_capacity, shutdown.clone());
        match ServerState::from_config(config, router, shutdown.clone()) {
            Ok(state) => Ok(Self {
                state: Arc::new(state),
                router_task,
            }),
            Err(e) => {
                shutdown.cancel();
                Err(e)
            }
        }
    }

    /// Shared state
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// The axum application for this server
    pub fn app(&self) -> axum::Router {
        app(Arc::clone(&self.state))
    }

    /// Bind `bind_addr` and serve until shutdown
    pub async fn run(self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(
            "Relay listening on {} (websocket at {})",
            local_addr,
            self.state.config.websocket_path
        );

        let shutdown = self.state.shutdown.clone();
        axum::serve(listener, self.app())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("HTTP server failed")?;

        // Sessions and the router stop on the same token.
        self.state.shutdown.cancel();
        if let Err(e) = self.router_task.await {
            tracing::warn!("Router task ended abnormally: {}", e);
        }

        tracing::info!("Relay on {} stopped", local_addr);
        Ok(())
    }
}
