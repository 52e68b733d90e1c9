//! TCP listener and accept loop

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::error::{ProxyError, Result};

use super::metrics::ProxyMetrics;
use super::session::{run_session, ProxyHandlers};

/// Accepts client connections and spawns one session per connection.
pub struct Listener {
    listener: TcpListener,
    config: Arc<Config>,
    handlers: Arc<ProxyHandlers>,
    metrics: Arc<ProxyMetrics>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Listener {
    /// Bind to the configured listen address.
    pub async fn bind(
        config: Arc<Config>,
        handlers: Arc<ProxyHandlers>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let addr = format!(
            "{}:{}",
            config.server.listen_address, config.server.listen_port
        );
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ProxyError::Connection(format!("Failed to bind {}: {}", addr, e)))?;
        info!("Proxy listening on {}", addr);

        Ok(Self {
            listener,
            config,
            handlers,
            metrics: ProxyMetrics::shared(),
            shutdown_rx,
        })
    }

    /// The actual bound address. Useful with `listen_port: 0`.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared metrics handle.
    pub fn metrics(&self) -> Arc<ProxyMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run the accept loop until the shutdown signal fires.
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping listener");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (socket, peer_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    debug!(peer = %peer_addr, "New connection");
                    self.metrics.connection_accepted();

                    let config = Arc::clone(&self.config);
                    let handlers = Arc::clone(&self.handlers);
                    let metrics = Arc::clone(&self.metrics);
                    tokio::spawn(async move {
                        let result =
                            run_session(socket, config, &handlers, Arc::clone(&metrics)).await;
                        metrics.connection_closed();
                        if let Err(e) = result {
                            error!(peer = %peer_addr, "Connection error: {}", e);
                        }
                    });
                }
            }
        }
    }
}
