//! Per-connection session plumbing
//!
//! Each accepted connection runs two cooperating pipelines:
//!
//! - the **client pipeline** ([`client`]) reads packets from the client,
//!   runs the censor and query observers, and forwards to the database;
//! - the **database pipeline** ([`backend`]) reads packets from the
//!   database, decrypts result columns and rewrites type OIDs, and
//!   forwards to the client.
//!
//! The client pipeline runs as a spawned task; the database pipeline runs
//! in the session task itself. They share exactly three things: the
//! [`ProtocolState`] (registries and the pending-query FIFO), the client
//! write half (a mutex, because censored-query responses are written from
//! the client pipeline while ordinary responses are written from the
//! database pipeline), and the stop-rendezvous used by the TLS upgrade.
//!
//! # Socket ownership and the TLS dance
//!
//! In steady state the client pipeline owns the client read half and the
//! server write half; the database pipeline owns the server read half and
//! the client write half. The SSL upgrade needs whole streams, so the
//! database pipeline asks the client pipeline to park: a stop flag plus
//! notify breaks it out of its read, it surrenders its halves over a
//! one-slot rendezvous channel and exits. The database pipeline reunites
//! the halves, performs both handshakes, re-splits the TLS streams and
//! spawns a fresh client pipeline. Waiting on the rendezvous is bounded by
//! [`CLIENT_STOP_TIMEOUT`]; a client pipeline that fails to park in time
//! fails the session.

pub(crate) mod backend;
pub(crate) mod client;
mod pending;
mod registry;
mod state;

pub use pending::{PendingQuery, PendingQueryQueue};
pub use registry::{CursorRegistry, Portal, PreparedStatement, StatementRegistry};
pub use state::{
    classify_client, classify_server, ClientPacketKind, ProtocolState, ServerPacketKind,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{split, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::time::timeout;
use uuid::Uuid;

use crate::censor::Censor;
use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::inspect::{
    AccessContext, ClientIdObserverSet, ColumnCryptor, QueryObserverSet, SchemaStore,
};
use crate::server::metrics::ProxyMetrics;
use crate::server::stream::NetworkStream;
use crate::tls::{TlsAcceptor, TlsConnector};

use backend::BackendPipeline;
use client::spawn_client_pipeline;

/// How long the database pipeline waits for the client pipeline to park
/// during the TLS dance.
pub(crate) const CLIENT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// The client write half, shared between the two pipelines. Ordinary
/// responses and censored-query responses are serialized through this lock.
pub(crate) type SharedClientWriter = Arc<AsyncMutex<WriteHalf<NetworkStream>>>;

/// The socket halves a parked client pipeline surrenders to the database
/// pipeline.
pub(crate) struct ClientParts {
    pub client_read: ReadHalf<NetworkStream>,
    pub server_write: WriteHalf<NetworkStream>,
    pub client_writer: SharedClientWriter,
}

/// Stop-rendezvous between the database pipeline and the client pipeline.
///
/// `request` breaks the client pipeline out of its blocking read (the
/// select on `notified` is the cancellation point); the parked pipeline
/// answers by sending its [`ClientParts`] over the one-slot channel.
pub(crate) struct ClientStop {
    requested: AtomicBool,
    notify: Notify,
    parts_tx: mpsc::Sender<ClientParts>,
}

impl ClientStop {
    /// Create the stop handle and the receiving end of the rendezvous.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<ClientParts>) {
        let (parts_tx, parts_rx) = mpsc::channel(1);
        (
            Arc::new(Self {
                requested: AtomicBool::new(false),
                notify: Notify::new(),
                parts_tx,
            }),
            parts_rx,
        )
    }

    /// Ask the client pipeline to park.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Whether a park has been requested and not yet cleared.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Re-arm the rendezvous after a successful park.
    pub fn clear(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    /// Wait until a park is requested.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Surrender the socket halves. Returns false when the session is
    /// already gone.
    pub async fn park(&self, parts: ClientParts) -> bool {
        self.parts_tx.send(parts).await.is_ok()
    }
}

/// The pluggable collaborators of a proxy instance, shared by all
/// sessions.
pub struct ProxyHandlers {
    /// Query allow/deny policy
    pub censor: Arc<dyn Censor>,
    /// Query and Bind-parameter rewriters
    pub observers: Arc<QueryObserverSet>,
    /// Per-column encryption settings source
    pub schema: Arc<dyn SchemaStore>,
    /// Result column transformer
    pub cryptor: Arc<dyn ColumnCryptor>,
    /// Subscribers for TLS-derived client identities
    pub client_id_observers: Arc<ClientIdObserverSet>,
}

impl ProxyHandlers {
    /// Handlers that make the proxy a transparent pass-through: allow-all
    /// censor, no observers, no schema, passthrough cryptor.
    pub fn passthrough() -> Self {
        Self {
            censor: Arc::new(crate::censor::AllowAllCensor),
            observers: Arc::new(QueryObserverSet::new()),
            schema: Arc::new(crate::inspect::EmptySchemaStore),
            cryptor: Arc::new(crate::inspect::PassthroughCryptor),
            client_id_observers: Arc::new(ClientIdObserverSet::new()),
        }
    }
}

/// State shared between the two pipelines of one session.
pub(crate) struct SessionShared {
    pub session_id: Uuid,
    pub state: ProtocolState,
    pub censor: Arc<dyn Censor>,
    pub observers: Arc<QueryObserverSet>,
    pub schema: Arc<dyn SchemaStore>,
    pub cryptor: Arc<dyn ColumnCryptor>,
    pub client_id_observers: Arc<ClientIdObserverSet>,
    pub access: AccessContext,
    pub metrics: Arc<ProxyMetrics>,
    pub network_timeout: Duration,
    pub stop: Arc<ClientStop>,
    pub error_tx: mpsc::UnboundedSender<ProxyError>,
}

/// Whether a session-ending error is part of normal connection teardown
/// (EOF, timeouts, resets) rather than a proxy failure.
fn is_benign(err: &ProxyError) -> bool {
    matches!(
        err,
        ProxyError::Io(_) | ProxyError::Timeout(_) | ProxyError::Connection(_)
    )
}

/// Run one proxied session to completion.
///
/// Connects to the target database, wires up both pipelines and drives
/// them until either side disconnects or a fatal error occurs. Benign
/// endings (EOF, timeouts) return `Ok`.
pub async fn run_session(
    client: TcpStream,
    config: Arc<Config>,
    handlers: &ProxyHandlers,
    metrics: Arc<ProxyMetrics>,
) -> Result<()> {
    let session_id = Uuid::new_v4();

    // TLS wrappers are built up front so a broken TLS configuration fails
    // the session before any bytes flow.
    let tls_acceptor = if config.server.tls.enabled {
        Some(TlsAcceptor::new(&config.server.tls)?)
    } else {
        None
    };
    let tls_connector = if config.target.tls.enabled {
        Some(TlsConnector::new(&config.target.tls)?)
    } else {
        None
    };

    let addr = format!("{}:{}", config.target.host, config.target.port);
    debug!(session_id = %session_id, "Connecting to PostgreSQL server at {}", addr);
    let server = timeout(config.server.connect_timeout(), TcpStream::connect(&addr))
        .await
        .map_err(|_| ProxyError::Timeout(format!("Connecting to {}", addr)))?
        .map_err(|e| ProxyError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;

    let (client_read, client_write) = split(NetworkStream::tcp(client));
    let (server_read, server_write) = split(NetworkStream::tcp(server));
    let client_writer: SharedClientWriter = Arc::new(AsyncMutex::new(client_write));

    let (stop, parts_rx) = ClientStop::new();
    let (error_tx, mut error_rx) = mpsc::unbounded_channel();

    let shared = Arc::new(SessionShared {
        session_id,
        state: ProtocolState::new(),
        censor: Arc::clone(&handlers.censor),
        observers: Arc::clone(&handlers.observers),
        schema: Arc::clone(&handlers.schema),
        cryptor: Arc::clone(&handlers.cryptor),
        client_id_observers: Arc::clone(&handlers.client_id_observers),
        access: AccessContext::new(session_id),
        metrics,
        network_timeout: config.server.network_timeout(),
        stop: Arc::clone(&stop),
        error_tx,
    });

    spawn_client_pipeline(
        Arc::clone(&shared),
        client_read,
        server_write,
        Arc::clone(&client_writer),
        true,
    );

    let backend = BackendPipeline::new(
        Arc::clone(&shared),
        server_read,
        client_writer,
        parts_rx,
        tls_acceptor,
        tls_connector,
        config.target.host.clone(),
    );

    let result = tokio::select! {
        result = backend.run() => result,
        err = error_rx.recv() => match err {
            Some(err) => Err(err),
            None => Ok(()),
        },
    };

    // Wake a reading (or parking) client pipeline so it observes the dead
    // rendezvous and exits.
    stop.request();

    match result {
        Ok(()) => {
            debug!(session_id = %session_id, "Session ended");
            Ok(())
        }
        Err(err) if is_benign(&err) => {
            debug!(session_id = %session_id, error = %err, "Session ended");
            Ok(())
        }
        Err(err) => {
            if let ProxyError::Tls(tls_err) = &err {
                if let Some(hint) = tls_err.suggestion() {
                    info!(session_id = %session_id, "{}", hint);
                }
            }
            error!(session_id = %session_id, error = %err, "Session failed");
            Err(err)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_errors() {
        assert!(is_benign(&ProxyError::Timeout("t".into())));
        assert!(is_benign(&ProxyError::Connection("c".into())));
        assert!(is_benign(&ProxyError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "eof"
        ))));
        assert!(!is_benign(&ProxyError::Framing("f".into())));
        assert!(!is_benign(&ProxyError::KeyRead("k".into())));
    }

    #[tokio::test]
    async fn test_client_stop_rendezvous_flags() {
        let (stop, _rx) = ClientStop::new();
        assert!(!stop.is_requested());
        stop.request();
        assert!(stop.is_requested());
        // The permit is stored: notified() returns immediately.
        stop.notified().await;
        stop.clear();
        assert!(!stop.is_requested());
    }

    #[tokio::test]
    async fn test_park_fails_after_receiver_drop() {
        let (stop, rx) = ClientStop::new();
        drop(rx);

        let (a, b) = tokio::io::duplex(64);
        let (client_read, _w) = split(NetworkStream::mem(a));
        let (_r, server_write) = split(NetworkStream::mem(b));
        let (_r2, client_write) = split(NetworkStream::mem(tokio::io::duplex(64).0));

        let parts = ClientParts {
            client_read,
            server_write,
            client_writer: Arc::new(AsyncMutex::new(client_write)),
        };
        assert!(!stop.park(parts).await);
    }
}
