//! shielddb-proxy - Transparent PostgreSQL proxy with column-level encryption
//!
//! This binary runs a standalone proxy that censors queries and, with the
//! appropriate observers configured, transparently encrypts and decrypts
//! column data between PostgreSQL clients and a server.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use shielddb_proxy::censor::PatternCensor;
use shielddb_proxy::config;
use shielddb_proxy::server::{Listener, ProxyHandlers};
use shielddb_proxy::Result;

#[derive(Parser)]
#[command(name = "shielddb-proxy")]
#[command(version)]
#[command(about = "Transparent PostgreSQL proxy with query censorship")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Override listen address
    #[arg(long)]
    listen_address: Option<String>,

    /// Override listen port
    #[arg(long)]
    listen_port: Option<u16>,

    /// Enable verbose/debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first so the configured log level applies unless
    // overridden by --verbose or RUST_LOG.
    let mut config = config::load_config(&cli.config)?;

    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone())
    };
    tracing_subscriber::fmt().with_env_filter(&log_level).init();

    info!("Starting shielddb-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from {:?}", cli.config);

    // Apply CLI overrides
    if let Some(addr) = cli.listen_address {
        config.server.listen_address = addr;
    }
    if let Some(port) = cli.listen_port {
        config.server.listen_port = port;
    }

    let config = Arc::new(config);

    let handlers = Arc::new(ProxyHandlers {
        censor: PatternCensor::from_config(&config.censor),
        ..ProxyHandlers::passthrough()
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let listener = Listener::bind(Arc::clone(&config), handlers, shutdown_rx).await?;
    let metrics = listener.metrics();

    info!(
        "Proxy ready: listening on {}:{} -> {}:{}",
        config.server.listen_address,
        config.server.listen_port,
        config.target.host,
        config.target.port
    );

    let listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            error!("Listener error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    let _ = shutdown_tx.send(());
    let _ = listener_handle.await;

    info!(
        "Shutdown complete. Total connections handled: {}",
        metrics
            .connections_accepted
            .load(std::sync::atomic::Ordering::Relaxed)
    );

    Ok(())
}
