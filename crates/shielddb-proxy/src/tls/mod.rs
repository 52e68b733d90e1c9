//! TLS/SSL support for shielddb-proxy
//!
//! This module provides TLS functionality for:
//! - **Server-side TLS**: Accepting encrypted connections from PostgreSQL clients
//! - **Client-side TLS**: Connecting to the PostgreSQL server over encrypted connections
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐        TLS        ┌───────────┐        TLS        ┌──────────┐
//! │  Client  │ ───────────────── │   Proxy   │ ───────────────── │ Database │
//! │ (psql)   │   (server-side)   │           │   (client-side)   │  Server  │
//! └──────────┘                   └───────────┘                   └──────────┘
//! ```
//!
//! The upgrade is opportunistic: the client sends an `SSLRequest` before its
//! startup message, the proxy forwards it, and when the database answers
//! `'S'` both legs of the session are wrapped in TLS before any further
//! protocol bytes flow.
//!
//! When client certificates are required, the client's identity is derived
//! from the certificate fingerprint after the handshake and published to
//! registered observers.
//!
//! # Security
//!
//! - Uses rustls (pure Rust TLS implementation) for memory safety
//! - TLS 1.2 minimum, TLS 1.3 preferred
//! - Certificate verification enabled by default

mod acceptor;
mod config;
mod connector;
mod error;

pub use acceptor::{client_identity, TlsAcceptor};
pub use config::{TlsClientConfig, TlsServerConfig, TlsVerifyMode};
pub use connector::TlsConnector;
pub use error::TlsError;

// Shared utilities for loading certificates and keys
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Load certificates from a PEM file
///
/// Reads all certificates from a PEM-encoded file and returns them as
/// a vector of `CertificateDer`. This supports certificate chains.
pub(crate) fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::cert_load(path, e.to_string()))?;

    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::cert_load(path, e.to_string()))?;

    Ok(certs)
}

/// Load a private key from a PEM file
///
/// Reads a private key from a PEM-encoded file. Supports RSA, PKCS8, and EC keys.
pub(crate) fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::key_load(path, e.to_string()))?;

    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::key_load(path, e.to_string()))?
        .ok_or_else(|| TlsError::key_load(path, "no private key found in file"))
}

/// Derive a stable client identity from a peer certificate.
///
/// The identity is the hex-encoded SHA-256 fingerprint of the DER-encoded
/// certificate. It is stable across reconnects as long as the client keeps
/// the same certificate.
pub fn certificate_identity(cert: &CertificateDer<'_>) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, cert.as_ref());
    hex::encode(digest.as_ref())
}
