//! TLS Acceptor for server-side TLS connections
//!
//! This module provides `TlsAcceptor` which upgrades the client leg of a
//! proxied session to TLS after a successful `SSLRequest` exchange. When
//! client certificates are required, the handshake also yields the client
//! identity derived from the certificate fingerprint.

use std::sync::Arc;

use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

use crate::tls::error::HandshakeSide;
use crate::tls::{
    certificate_identity, load_certificates, load_private_key, TlsError, TlsServerConfig,
};

/// TLS Acceptor for upgrading client connections to TLS
///
/// Wraps `tokio_rustls::TlsAcceptor` with configuration loading,
/// optional client certificate verification, and handshake error
/// classification.
#[derive(Clone)]
pub struct TlsAcceptor {
    inner: tokio_rustls::TlsAcceptor,
}

impl TlsAcceptor {
    /// Create a new TLS acceptor from configuration
    ///
    /// Loads the server certificate and private key from the paths
    /// specified in the configuration. When `require_client_cert` is set,
    /// the CA bundle at `ca_path` is used to verify client certificates.
    pub fn new(config: &TlsServerConfig) -> Result<Self, TlsError> {
        config.validate().map_err(TlsError::config)?;

        let cert_path = config
            .cert_path
            .as_ref()
            .ok_or_else(|| TlsError::config("cert_path is required"))?;

        let key_path = config
            .key_path
            .as_ref()
            .ok_or_else(|| TlsError::config("key_path is required"))?;

        let certs = load_certificates(cert_path)?;
        if certs.is_empty() {
            return Err(TlsError::cert_load(
                cert_path,
                "no certificates found in file",
            ));
        }

        let key = load_private_key(key_path)?;

        let provider = rustls::crypto::ring::default_provider();

        let builder = ServerConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::config(format!("Failed to set protocol versions: {}", e)))?;

        let server_config = if config.require_client_cert {
            let ca_path = config
                .ca_path
                .as_ref()
                .ok_or_else(|| TlsError::config("ca_path is required for client certs"))?;
            let mut roots = RootCertStore::empty();
            for cert in load_certificates(ca_path)? {
                roots
                    .add(cert)
                    .map_err(|e| TlsError::cert_load(ca_path, e.to_string()))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| {
                    TlsError::config(format!("Failed to build client verifier: {}", e))
                })?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
                .map_err(|e| TlsError::config(format!("Failed to build TLS config: {}", e)))?
        } else {
            builder
                .with_no_client_auth()
                .with_single_cert(certs, key)
                .map_err(|e| TlsError::config(format!("Failed to build TLS config: {}", e)))?
        };

        let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config));

        Ok(Self { inner: acceptor })
    }

    /// Upgrade a TCP stream to TLS
    ///
    /// Performs the TLS handshake with the client. Handshake failures are
    /// classified into specific [`TlsError`] kinds so the caller can log a
    /// targeted remediation hint.
    pub async fn accept(&self, stream: TcpStream) -> Result<TlsStream<TcpStream>, TlsError> {
        self.inner
            .accept(stream)
            .await
            .map_err(|e| TlsError::classify_handshake(HandshakeSide::Client, e))
    }
}

/// Extract the client identity from a completed server-side handshake.
///
/// Returns the certificate fingerprint of the peer's leaf certificate, or
/// `None` when the client did not present one.
pub fn client_identity(stream: &TlsStream<TcpStream>) -> Option<String> {
    stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .map(certificate_identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_acceptor_missing_cert_path() {
        let config = TlsServerConfig {
            enabled: true,
            cert_path: None,
            key_path: Some(PathBuf::from("/key.pem")),
            ca_path: None,
            require_client_cert: false,
        };

        let result = TlsAcceptor::new(&config);
        assert!(result.is_err());
        let err = result.err().unwrap().to_string();
        assert!(err.contains("cert_path") || err.contains("TLS enabled"));
    }

    #[test]
    fn test_acceptor_nonexistent_cert_file() {
        let config = TlsServerConfig {
            enabled: true,
            cert_path: Some(PathBuf::from("/nonexistent/cert.pem")),
            key_path: Some(PathBuf::from("/nonexistent/key.pem")),
            ca_path: None,
            require_client_cert: false,
        };

        let result = TlsAcceptor::new(&config);
        assert!(result.is_err());
        let err = result.err().unwrap().to_string();
        assert!(err.contains("certificate") || err.contains("cert"));
    }

    #[test]
    fn test_acceptor_client_cert_without_ca() {
        let config = TlsServerConfig {
            enabled: true,
            cert_path: Some(PathBuf::from("/cert.pem")),
            key_path: Some(PathBuf::from("/key.pem")),
            ca_path: None,
            require_client_cert: true,
        };

        let result = TlsAcceptor::new(&config);
        assert!(result.is_err());
    }
}
