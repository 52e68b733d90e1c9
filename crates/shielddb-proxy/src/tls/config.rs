//! TLS configuration types
//!
//! This module defines configuration structures for TLS/SSL connections:
//! - `TlsServerConfig` for accepting TLS connections from clients
//! - `TlsClientConfig` for connecting to the database server over TLS

use serde::Deserialize;
use std::path::PathBuf;

/// Server-side TLS configuration (proxy accepting client connections)
///
/// This configuration controls how the proxy answers a client `SSLRequest`.
/// When enabled, the proxy terminates the client's TLS leg with this
/// certificate after the database has accepted the upgrade.
///
/// # Example YAML
/// ```yaml
/// server:
///   listen_port: 5433
///   tls:
///     enabled: true
///     cert_path: "/path/to/server.crt"
///     key_path: "/path/to/server.key"
///     ca_path: "/path/to/client-ca.crt"
///     require_client_cert: true
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TlsServerConfig {
    /// Enable TLS for client connections
    #[serde(default)]
    pub enabled: bool,

    /// Path to server certificate in PEM format
    ///
    /// This certificate is presented to clients during TLS handshake.
    pub cert_path: Option<PathBuf>,

    /// Path to server private key in PEM format
    pub key_path: Option<PathBuf>,

    /// Path to the CA bundle used to verify client certificates
    ///
    /// Required when `require_client_cert` is set.
    pub ca_path: Option<PathBuf>,

    /// Require clients to present a certificate
    ///
    /// When set, the handshake fails without a client certificate and the
    /// session identity is derived from the certificate fingerprint.
    #[serde(default)]
    pub require_client_cert: bool,
}

/// Client-side TLS configuration (proxy connecting to the database)
///
/// # Example YAML
/// ```yaml
/// target:
///   host: "db.example.com"
///   port: 5432
///   tls:
///     enabled: true
///     verify_mode: "verify"
///     ca_path: "/path/to/ca-bundle.crt"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TlsClientConfig {
    /// Enable TLS for database connections
    #[serde(default)]
    pub enabled: bool,

    /// Certificate verification mode
    ///
    /// Controls how the proxy verifies the database server's certificate.
    /// Default is `Verify` (full verification).
    #[serde(default)]
    pub verify_mode: TlsVerifyMode,

    /// Path to CA certificate bundle in PEM format
    ///
    /// Used to verify the database server's certificate.
    /// If not specified, uses the built-in webpki roots.
    pub ca_path: Option<PathBuf>,

    /// Path to client certificate in PEM format (optional)
    ///
    /// For certificate-based authentication to the database.
    /// If specified, `client_key_path` must also be specified.
    pub client_cert_path: Option<PathBuf>,

    /// Path to client private key in PEM format (optional)
    pub client_key_path: Option<PathBuf>,
}

/// Certificate verification mode for client-side TLS
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TlsVerifyMode {
    /// Full verification: CA chain + hostname match
    #[default]
    Verify,

    /// Verify CA chain only, skip hostname check
    ///
    /// Useful for connecting via IP address when the cert has a DNS name.
    #[serde(rename = "verify_ca")]
    VerifyCa,

    /// No verification (INSECURE - development only!)
    ///
    /// WARNING: Any certificate will be accepted, including self-signed
    /// and expired.
    None,
}

impl TlsServerConfig {
    /// Validate the server TLS configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled {
            if self.cert_path.is_none() {
                return Err("TLS enabled but cert_path not specified".to_string());
            }
            if self.key_path.is_none() {
                return Err("TLS enabled but key_path not specified".to_string());
            }
            if self.require_client_cert && self.ca_path.is_none() {
                return Err("require_client_cert set but ca_path not specified".to_string());
            }
        }
        Ok(())
    }
}

impl TlsClientConfig {
    /// Validate the client TLS configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(
                "client_cert_path and client_key_path must both be specified or both omitted"
                    .to_string(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_server_config_defaults() {
        let config: TlsServerConfig = serde_yaml::from_str("{}").unwrap();
        assert!(!config.enabled);
        assert!(config.cert_path.is_none());
        assert!(config.key_path.is_none());
        assert!(!config.require_client_cert);
    }

    #[test]
    fn test_tls_server_config_full() {
        let yaml = r#"
            enabled: true
            cert_path: /path/to/cert.pem
            key_path: /path/to/key.pem
            ca_path: /path/to/ca.pem
            require_client_cert: true
        "#;
        let config: TlsServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.enabled);
        assert_eq!(
            config.cert_path.unwrap(),
            PathBuf::from("/path/to/cert.pem")
        );
        assert!(config.require_client_cert);
    }

    #[test]
    fn test_tls_client_config_defaults() {
        let config: TlsClientConfig = serde_yaml::from_str("{}").unwrap();
        assert!(!config.enabled);
        assert_eq!(config.verify_mode, TlsVerifyMode::Verify);
        assert!(config.ca_path.is_none());
    }

    #[test]
    fn test_tls_verify_mode_parsing() {
        let verify: TlsVerifyMode = serde_yaml::from_str("verify").unwrap();
        assert_eq!(verify, TlsVerifyMode::Verify);

        let verify_ca: TlsVerifyMode = serde_yaml::from_str("verify_ca").unwrap();
        assert_eq!(verify_ca, TlsVerifyMode::VerifyCa);

        let none: TlsVerifyMode = serde_yaml::from_str("none").unwrap();
        assert_eq!(none, TlsVerifyMode::None);
    }

    #[test]
    fn test_tls_server_validation_enabled_missing_cert() {
        let config = TlsServerConfig {
            enabled: true,
            cert_path: None,
            key_path: Some(PathBuf::from("/key.pem")),
            ca_path: None,
            require_client_cert: false,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tls_server_validation_client_cert_needs_ca() {
        let config = TlsServerConfig {
            enabled: true,
            cert_path: Some(PathBuf::from("/cert.pem")),
            key_path: Some(PathBuf::from("/key.pem")),
            ca_path: None,
            require_client_cert: true,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tls_client_validation_partial_client_cert() {
        let config = TlsClientConfig {
            enabled: true,
            verify_mode: TlsVerifyMode::Verify,
            ca_path: None,
            client_cert_path: Some(PathBuf::from("/client.crt")),
            client_key_path: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tls_server_validation_disabled() {
        let config = TlsServerConfig::default();
        assert!(config.validate().is_ok());
    }
}
