//! clipboard-remote relay server
//!
//! Accepts one WebSocket per device and relays clipboard changes between
//! the devices of each user.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cr_core::config::{self, ServerConfig};
use cr_server::RelayServer;

#[derive(Parser)]
#[command(name = "cr-server")]
#[command(about = "clipboard-remote relay server")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "CR_SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("clipboard-remote relay starting...");

    let mut config: ServerConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_server_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                ServerConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            ServerConfig::default()
        }
    };

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    config.validate().context("Invalid server configuration")?;

    if config.auths.is_empty() {
        tracing::warn!("No accounts configured - all connections will be rejected");
    } else {
        tracing::info!("Loaded {} accounts", config.auths.len());
    }

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let bind_addr = config.bind_address.clone();
    match &config.database_path {
        Some(path) => tracing::info!("Storing clipboard content in {:?}", path),
        None => tracing::info!("Storing clipboard content in memory"),
    }
    let server =
        RelayServer::from_config(config, cancel).context("Failed to open the clipboard store")?;
    server.run(&bind_addr).await?;

    tracing::info!("Relay shutdown complete");
    Ok(())
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
