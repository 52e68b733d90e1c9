//! TLS-specific error types
//!
//! This module defines errors that can occur during TLS operations.
//! Handshake failures are classified into specific kinds so that the logs
//! can carry a targeted remediation hint for each; all of them are fatal
//! to the session.

use std::path::PathBuf;
use thiserror::Error;

/// TLS-specific errors
#[derive(Error, Debug)]
pub enum TlsError {
    /// Failed to load certificate from file
    #[error("Failed to load certificate from {path}: {reason}")]
    CertificateLoad {
        /// Path to the certificate file
        path: PathBuf,
        /// Reason for the failure
        reason: String,
    },

    /// Failed to load private key from file
    #[error("Failed to load private key from {path}: {reason}")]
    PrivateKeyLoad {
        /// Path to the key file
        path: PathBuf,
        /// Reason for the failure
        reason: String,
    },

    /// Client-side handshake failed with a bad_record_mac alert
    #[error("TLS handshake with client failed (bad record MAC): {0}")]
    ClientBadRecordMac(String),

    /// Client rejected our certificate with an unknown_ca alert
    #[error("TLS handshake with client failed (unknown CA): {0}")]
    ClientUnknownCa(String),

    /// Client did not present a certificate although one is required
    #[error("TLS handshake with client failed (no client certificate): {0}")]
    MissingClientCertificate(String),

    /// Database certificate does not match the expected server name
    #[error("TLS handshake with database failed (SNI mismatch): {0}")]
    SniMismatch(String),

    /// Database certificate was signed by an unknown CA
    #[error("TLS handshake with database failed (unknown CA): {0}")]
    DatabaseUnknownCa(String),

    /// Certificate revocation check failed
    #[error("Certificate revocation check failed: {0}")]
    CrlFailure(String),

    /// TLS handshake failed for a reason without a dedicated kind
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    Config(String),

    /// I/O error during TLS operation
    #[error("TLS I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which side of the proxy a handshake was performed with. Used to pick
/// the error kind when classifying rustls failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandshakeSide {
    Client,
    Database,
}

impl TlsError {
    /// Create a certificate load error
    pub fn cert_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TlsError::CertificateLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a private key load error
    pub fn key_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TlsError::PrivateKeyLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a handshake error
    pub fn handshake(reason: impl Into<String>) -> Self {
        TlsError::Handshake(reason.into())
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        TlsError::Config(reason.into())
    }

    /// Classify a handshake I/O error into a specific kind.
    ///
    /// tokio-rustls surfaces rustls alerts as `io::Error`s wrapping
    /// `rustls::Error`, so classification is done on the rendered message.
    pub(crate) fn classify_handshake(side: HandshakeSide, err: std::io::Error) -> Self {
        let msg = err.to_string();
        let lower = msg.to_lowercase();
        if lower.contains("bad record mac") || lower.contains("badrecordmac") {
            return TlsError::ClientBadRecordMac(msg);
        }
        if lower.contains("certificaterequired") || lower.contains("certificate required") {
            return TlsError::MissingClientCertificate(msg);
        }
        if lower.contains("notvalidforname") || lower.contains("not valid for name") {
            return TlsError::SniMismatch(msg);
        }
        if lower.contains("unknownissuer")
            || lower.contains("unknown issuer")
            || lower.contains("unknownca")
            || lower.contains("unknown ca")
        {
            return match side {
                HandshakeSide::Client => TlsError::ClientUnknownCa(msg),
                HandshakeSide::Database => TlsError::DatabaseUnknownCa(msg),
            };
        }
        if lower.contains("revoked") || lower.contains("revocation") || lower.contains("crl") {
            return TlsError::CrlFailure(msg);
        }
        TlsError::Handshake(msg)
    }

    /// A remediation hint worth logging next to the error, when one exists.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            TlsError::ClientBadRecordMac(_) => Some(
                "the client may be speaking plaintext on a TLS socket; \
                 check that the client really negotiated SSL",
            ),
            TlsError::ClientUnknownCa(_) => Some(
                "the client does not trust the proxy certificate; \
                 distribute the proxy CA certificate to clients",
            ),
            TlsError::MissingClientCertificate(_) => Some(
                "client certificates are required; configure the client \
                 with sslcert/sslkey or disable require_client_cert",
            ),
            TlsError::SniMismatch(_) => Some(
                "the database certificate does not cover the configured \
                 target host; fix the certificate SAN or the target host name",
            ),
            TlsError::DatabaseUnknownCa(_) => Some(
                "the proxy does not trust the database certificate; \
                 point ca_path at the CA that signed it",
            ),
            TlsError::CrlFailure(_) => Some(
                "a certificate in the chain is revoked or the revocation \
                 list could not be checked",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    fn io(msg: &str) -> IoError {
        IoError::new(ErrorKind::InvalidData, msg.to_string())
    }

    #[test]
    fn test_certificate_load_error_display() {
        let err = TlsError::cert_load("/path/to/cert.pem", "file not found");
        let msg = err.to_string();
        assert!(msg.contains("/path/to/cert.pem"));
        assert!(msg.contains("file not found"));
    }

    #[test]
    fn test_classify_bad_record_mac() {
        let err = TlsError::classify_handshake(HandshakeSide::Client, io("peer sent BadRecordMac"));
        assert!(matches!(err, TlsError::ClientBadRecordMac(_)));
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_classify_unknown_ca_per_side() {
        let client =
            TlsError::classify_handshake(HandshakeSide::Client, io("received UnknownIssuer alert"));
        assert!(matches!(client, TlsError::ClientUnknownCa(_)));

        let db = TlsError::classify_handshake(
            HandshakeSide::Database,
            io("invalid peer certificate: UnknownIssuer"),
        );
        assert!(matches!(db, TlsError::DatabaseUnknownCa(_)));
    }

    #[test]
    fn test_classify_missing_client_certificate() {
        let err = TlsError::classify_handshake(
            HandshakeSide::Client,
            io("peer sent alert CertificateRequired"),
        );
        assert!(matches!(err, TlsError::MissingClientCertificate(_)));
    }

    #[test]
    fn test_classify_sni_mismatch() {
        let err = TlsError::classify_handshake(
            HandshakeSide::Database,
            io("invalid peer certificate: NotValidForName"),
        );
        assert!(matches!(err, TlsError::SniMismatch(_)));
    }

    #[test]
    fn test_classify_crl_failure() {
        let err =
            TlsError::classify_handshake(HandshakeSide::Database, io("certificate is Revoked"));
        assert!(matches!(err, TlsError::CrlFailure(_)));
    }

    #[test]
    fn test_classify_fallback() {
        let err = TlsError::classify_handshake(HandshakeSide::Client, io("connection reset"));
        assert!(matches!(err, TlsError::Handshake(_)));
        assert!(err.suggestion().is_none());
    }
}
