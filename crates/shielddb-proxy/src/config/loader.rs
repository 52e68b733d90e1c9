//! Configuration loading from YAML files

use std::path::Path;

use crate::error::{ProxyError, Result};

use super::types::Config;

/// Load and validate configuration from a YAML file
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ProxyError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
    load_config_from_str(&contents)
}

/// Load and validate configuration from a YAML string
///
/// Used by tests and embedders that assemble configuration in memory.
pub fn load_config_from_str(contents: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate().map_err(ProxyError::Config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_str() {
        let yaml = r#"
server:
  listen_port: 6000
target:
  host: "localhost"
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.server.listen_port, 6000);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = load_config_from_str("server: [not a map").unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = load_config(Path::new("/nonexistent/proxy.yaml")).unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }
}
