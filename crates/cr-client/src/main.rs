//! clipboard-remote device client
//!
//! Connects to the relay and keeps the local clipboard in sync with the
//! user's other devices. In manual mode, `push` and `pull` lines on stdin
//! upload and download the clipboard.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cr_client::{Connector, SystemClipboard, Trigger};
use cr_core::config::{self, ClientConfig};
use cr_protocol::SyncMode;

/// Pending manual requests
const TRIGGER_CHANNEL_CAPACITY: usize = 8;

#[derive(Parser)]
#[command(name = "cr-client")]
#[command(about = "clipboard-remote client - syncs the clipboard through a relay")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "CR_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    /// Relay address as host:port (overrides config)
    #[arg(short, long)]
    server: Option<String>,

    /// Account name (overrides config)
    #[arg(short, long)]
    user: Option<String>,

    /// Sync mode: auto or manual (overrides config)
    #[arg(long)]
    mode: Option<SyncMode>,

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

    let mut config: ClientConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_client_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                ClientConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            ClientConfig::default()
        }
    };

    if let Some(server) = args.server {
        config.server_address = server;
    }
    if let Some(user) = args.user {
        config.auth.user = user;
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }

    config
        .validate()
        .context("Invalid client configuration; set auth.user in the config or pass --user")?;

    tracing::info!(
        "clipboard-remote client starting ({} mode, relay {})",
        config.mode,
        config.server_address
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let clipboard =
        SystemClipboard::new(config.poll_interval).context("Failed to open the clipboard")?;

    let triggers = match config.mode {
        SyncMode::Manual => Some(spawn_stdin_triggers(cancel.clone())),
        SyncMode::Auto => None,
    };

    let connector = Connector::new(config, Arc::new(clipboard))
        .context("Failed to create connector")?;
    Arc::new(connector).run(cancel, triggers).await;

    tracing::info!("Client shutdown complete");
    Ok(())
}

/// Turn `push` / `pull` lines on stdin into triggers
fn spawn_stdin_triggers(cancel: CancellationToken) -> mpsc::Receiver<Trigger> {
    let (tx, rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("Type 'push' to upload the clipboard or 'pull' to download it.");

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match line.parse::<Trigger>() {
                Ok(trigger) => {
                    if tx.send(trigger).await.is_err() {
                        break;
                    }
                }
                Err(e) => eprintln!("{}", e),
            }
        }
    });

    rx
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
                tracing::info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, shutting down...");
            }
        }

        cancel.cancel();
    });
}
