//! Runtime configuration for the mock server.
//!
//! Settings come from an optional YAML file; command-line flags override
//! individual fields. Mapping definitions themselves live in JSON mapping
//! files, not here.

use crate::executor::DEFAULT_SERVER_NAME;
use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Port the HTTP listener binds to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root mapping file; discovered in the working directory when unset
    #[serde(default)]
    pub mapfile: Option<PathBuf>,

    /// Reload mappings when a contributing file changes
    #[serde(default = "default_true")]
    pub watch: bool,

    /// Timeout for remote forwards
    #[serde(default = "default_forward_timeout_ms")]
    pub forward_timeout_ms: u64,

    /// Cap on inbound request bodies and forwarded response bodies
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Value of the `Server` response header
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

fn default_port() -> u16 {
    3214
}

fn default_true() -> bool {
    true
}

fn default_forward_timeout_ms() -> u64 {
    30_000
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_server_name() -> String {
    DEFAULT_SERVER_NAME.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            mapfile: None,
            watch: default_true(),
            forward_timeout_ms: default_forward_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
            server_name: default_server_name(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.forward_timeout_ms == 0 {
            anyhow::bail!("forward_timeout_ms must be greater than 0");
        }
        if self.max_body_bytes == 0 {
            anyhow::bail!("max_body_bytes must be greater than 0");
        }
        if self.server_name.is_empty() || HeaderValue::from_str(&self.server_name).is_err() {
            anyhow::bail!("server_name must be a non-empty header value");
        }
        Ok(())
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: ServerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.port, 3214);
        assert!(config.watch);
        assert_eq!(config.forward_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_body_bytes, 10 * 1024 * 1024);
        assert!(config.server_name.starts_with("zentinel-mock-server/"));
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
port: 8080
mapfile: mocks/main.json
watch: false
forward_timeout_ms: 500
max_body_bytes: 1024
server_name: mocks/1
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.mapfile, Some(PathBuf::from("mocks/main.json")));
        assert!(!config.watch);
        assert_eq!(config.forward_timeout_ms, 500);
        assert_eq!(config.max_body_bytes, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(serde_yaml::from_str::<ServerConfig>("prot: 1").is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig {
            forward_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.forward_timeout_ms = 1;
        config.server_name = "bad\nname".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_and_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.yaml");
        std::fs::write(&path, "port: 9000\n").unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 9000);

        let yaml = config.to_yaml().unwrap();
        let reparsed: ServerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(reparsed, config);
    }
}
