//! TLS Connector for the database leg of a proxied session
//!
//! This module provides `TlsConnector` which establishes a TLS-encrypted
//! connection to the PostgreSQL server after it has accepted the forwarded
//! `SSLRequest`.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::ClientConfig;
use rustls::RootCertStore;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::tls::error::HandshakeSide;
use crate::tls::{load_certificates, load_private_key, TlsClientConfig, TlsError, TlsVerifyMode};

/// TLS Connector for establishing TLS connections to the database
///
/// Wraps `tokio_rustls::TlsConnector` with configuration loading
/// and handshake error classification.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Create a new TLS connector from configuration
    ///
    /// Loads CA certificates and optionally client certificates from the
    /// paths specified in the configuration. With `verify_mode: none` the
    /// server certificate is accepted without verification.
    pub fn new(config: &TlsClientConfig) -> Result<Self, TlsError> {
        config.validate().map_err(TlsError::config)?;

        let provider = rustls::crypto::ring::default_provider();

        let builder = ClientConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::config(format!("Failed to set protocol versions: {}", e)))?;

        let builder = if config.verify_mode == TlsVerifyMode::None {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoCertificateVerification {}))
        } else {
            let root_store = build_root_store(config)?;
            builder.with_root_certificates(root_store)
        };

        let client_config = if let (Some(cert_path), Some(key_path)) =
            (&config.client_cert_path, &config.client_key_path)
        {
            let certs = load_certificates(cert_path)?;
            if certs.is_empty() {
                return Err(TlsError::cert_load(
                    cert_path,
                    "no certificates found in file",
                ));
            }
            let key = load_private_key(key_path)?;

            builder.with_client_auth_cert(certs, key).map_err(|e| {
                TlsError::config(format!("Failed to build client TLS config: {}", e))
            })?
        } else {
            builder.with_no_client_auth()
        };

        let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));

        Ok(Self { inner: connector })
    }

    /// Connect to the database over TLS
    ///
    /// Performs the TLS handshake. The `server_name` is used for SNI and
    /// certificate verification. Handshake failures are classified into
    /// specific [`TlsError`] kinds (SNI mismatch, unknown CA, revocation).
    pub async fn connect(
        &self,
        stream: TcpStream,
        server_name: &str,
    ) -> Result<TlsStream<TcpStream>, TlsError> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TlsError::config(format!("Invalid server name: {}", server_name)))?;

        self.inner
            .connect(server_name, stream)
            .await
            .map_err(|e| TlsError::classify_handshake(HandshakeSide::Database, e))
    }
}

/// Build the root certificate store based on configuration
fn build_root_store(config: &TlsClientConfig) -> Result<RootCertStore, TlsError> {
    let mut root_store = RootCertStore::empty();

    if let Some(ca_path) = &config.ca_path {
        let certs = load_certificates(ca_path)?;
        for cert in certs {
            root_store
                .add(cert)
                .map_err(|e| TlsError::cert_load(ca_path, e.to_string()))?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    Ok(root_store)
}

/// Custom certificate verifier that accepts any certificate
///
/// **WARNING**: This is insecure and should only be used for testing.
#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_connector_default_config() {
        let config = TlsClientConfig::default();
        let result = TlsConnector::new(&config);
        assert!(result.is_ok());
    }

    #[test]
    fn test_connector_insecure_mode() {
        let config = TlsClientConfig {
            enabled: true,
            verify_mode: TlsVerifyMode::None,
            ca_path: None,
            client_cert_path: None,
            client_key_path: None,
        };
        let result = TlsConnector::new(&config);
        assert!(result.is_ok());
    }

    #[test]
    fn test_connector_nonexistent_ca_file() {
        let config = TlsClientConfig {
            enabled: true,
            verify_mode: TlsVerifyMode::Verify,
            ca_path: Some(PathBuf::from("/nonexistent/ca.crt")),
            client_cert_path: None,
            client_key_path: None,
        };

        let result = TlsConnector::new(&config);
        assert!(result.is_err());
        let err = result.err().unwrap().to_string();
        assert!(err.contains("certificate") || err.contains("cert"));
    }

    #[test]
    fn test_connector_partial_client_cert() {
        let config = TlsClientConfig {
            enabled: true,
            verify_mode: TlsVerifyMode::Verify,
            ca_path: None,
            client_cert_path: Some(PathBuf::from("/path/to/cert.pem")),
            client_key_path: None,
        };

        let result = TlsConnector::new(&config);
        assert!(result.is_err());
    }

    #[test]
    fn test_build_root_store_with_webpki_fallback() {
        let config = TlsClientConfig::default();
        let store = build_root_store(&config).unwrap();
        assert!(!store.is_empty());
    }
}
