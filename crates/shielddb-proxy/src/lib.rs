//! shielddb-proxy - Transparent PostgreSQL proxy with column-level encryption
//!
//! This library provides the core functionality for a man-in-the-middle
//! PostgreSQL proxy that:
//! - Speaks the v3 wire protocol on both sides and forwards byte-exact
//!   frames, recomputing lengths only for the packets it rewrites
//! - Enforces an allow/deny query censor without dropping the session
//! - Lets pluggable observers rewrite queries and bound parameters on the
//!   way to the database (transparent encryption)
//! - Decrypts result columns and rewrites advertised type OIDs on the way
//!   back to the client
//! - Negotiates the client-initiated `SSLRequest` upgrade, wrapping both
//!   legs of the session in TLS mid-stream

#[macro_use]
mod logging;

pub mod censor;
pub mod config;
pub mod error;
pub mod inspect;
pub mod protocol;
pub mod scrub;
pub mod server;
pub mod tls;

pub use censor::{AllowAllCensor, Censor, PatternCensor, Verdict};
pub use config::Config;
pub use error::{ProxyError, Result};
pub use inspect::{
    AccessContext, ClientIdObserver, ColumnCryptor, ColumnEncryptionSetting, QueryObserver,
    SchemaStore,
};
pub use server::{Listener, NetworkStream, ProxyHandlers, ProxyMetrics};
pub use tls::{
    TlsAcceptor, TlsClientConfig, TlsConnector, TlsError, TlsServerConfig, TlsVerifyMode,
};
