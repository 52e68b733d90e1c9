//! Configuration types

use serde::Deserialize;
use std::time::Duration;

use crate::tls::{TlsClientConfig, TlsServerConfig};

/// Root configuration structure
///
/// # Example
///
/// ```yaml
/// server:
///   listen_address: "0.0.0.0"
///   listen_port: 5433
///   tls:
///     enabled: true
///     cert_path: "/path/to/proxy.crt"
///     key_path: "/path/to/proxy.key"
///
/// target:
///   host: "postgres.example.com"
///   port: 5432
///   tls:
///     enabled: true
///     ca_path: "/path/to/db-ca.crt"
///
/// censor:
///   deny_patterns:
///     - "drop table"
///     - "pg_catalog"
/// ```
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Server (listen) configuration
    pub server: ServerConfig,

    /// Target database configuration
    pub target: TargetConfig,

    /// Query censor configuration
    #[serde(default)]
    pub censor: CensorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.target.host.is_empty() {
            return Err("target.host must not be empty".to_string());
        }
        self.server.tls.validate()?;
        self.target.tls.validate()?;
        Ok(())
    }
}

/// Listen-side configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Port to listen on
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Timeout for connecting to the target database, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Per-write deadline on proxied packets, in seconds
    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,

    /// TLS configuration for client connections
    #[serde(default)]
    pub tls: TlsServerConfig,
}

impl ServerConfig {
    /// The per-write deadline as a Duration.
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    /// The connect timeout as a Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            network_timeout_secs: default_network_timeout_secs(),
            tls: TlsServerConfig::default(),
        }
    }
}

/// Target database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Database host
    pub host: String,

    /// Database port
    #[serde(default = "default_target_port")]
    pub port: u16,

    /// TLS configuration for the database connection
    #[serde(default)]
    pub tls: TlsClientConfig,
}

/// Query censor configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CensorConfig {
    /// Case-insensitive substrings that block a query when matched
    #[serde(default)]
    pub deny_patterns: Vec<String>,

    /// Message returned to the client for blocked queries
    #[serde(default = "default_censor_message")]
    pub message: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen_address() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    5433
}

fn default_target_port() -> u16 {
    5432
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_network_timeout_secs() -> u64 {
    10
}

fn default_censor_message() -> String {
    "Query blocked by security policy".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let yaml = r#"
server: {}
target:
  host: "127.0.0.1"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.listen_port, 5433);
        assert_eq!(config.target.port, 5432);
        assert!(config.censor.deny_patterns.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
server:
  listen_address: "0.0.0.0"
  listen_port: 6432
  network_timeout_secs: 5
target:
  host: "db.internal"
  port: 5433
censor:
  deny_patterns:
    - "drop table"
  message: "denied"
logging:
  level: "debug"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.listen_address, "0.0.0.0");
        assert_eq!(config.server.network_timeout(), Duration::from_secs(5));
        assert_eq!(config.target.host, "db.internal");
        assert_eq!(config.censor.deny_patterns, vec!["drop table"]);
        assert_eq!(config.censor.message, "denied");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_empty_target_host_rejected() {
        let yaml = r#"
server: {}
target:
  host: ""
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
