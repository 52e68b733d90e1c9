//! Error types for shielddb-proxy

use thiserror::Error;

use crate::tls::TlsError;

/// Main error type for the proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    /// I/O error (network, file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wire framing error (short read, length underflow, oversized message)
    #[error("Framing error: {0}")]
    Framing(String),

    /// Protocol state violation (unknown portal, queue mismatch)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Failed to decode or re-encode a message payload.
    ///
    /// On the server-to-client path this is recoverable: the client gets a
    /// synthesized ErrorResponse and the rest of the response is drained.
    /// On the client-to-server path it tears the session down.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Key material could not be read by an observer or cryptor
    #[error("Key read error: {0}")]
    KeyRead(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// TLS/SSL error
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),
}

impl ProxyError {
    /// Whether this error is an encoding failure that the database-side
    /// pipeline can recover from by skipping the rest of the response.
    pub fn is_encoding_error(&self) -> bool {
        matches!(self, ProxyError::Encoding(_))
    }

    /// Whether this error came from the key store. Key read failures are
    /// always fatal to the session, never downgraded to a warning.
    pub fn is_key_read_error(&self) -> bool {
        matches!(self, ProxyError::KeyRead(_))
    }
}

/// Result type alias for ProxyError
pub type Result<T> = std::result::Result<T, ProxyError>;

impl From<serde_yaml::Error> for ProxyError {
    fn from(err: serde_yaml::Error) -> Self {
        ProxyError::Config(err.to_string())
    }
}
