//! Optional TOML configuration file
//!
//! Command-line values override file values; file values override built-in
//! defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Enabled modules (all when absent)
    pub modules: Option<Vec<String>>,
    pub extra_module_paths: Vec<PathBuf>,
    /// Seconds between advertizements
    pub announcer_period: Option<f64>,
    pub client_socket_path: Option<PathBuf>,
    /// Seconds to wait for a bridged reply
    pub client_socket_timeout: Option<f64>,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let config = DaemonConfig::parse(
            r#"
            modules = ["lan"]
            extra_module_paths = ["/usr/share/foris-controller/modules"]
            announcer_period = 2.5
            client_socket_path = "/tmp/bridge.soc"
            client_socket_timeout = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.modules, Some(vec!["lan".to_string()]));
        assert_eq!(config.extra_module_paths.len(), 1);
        assert_eq!(config.announcer_period, Some(2.5));
        assert_eq!(config.client_socket_timeout, Some(30.0));
    }

    #[test]
    fn test_parse_empty_and_unknown() {
        assert_eq!(DaemonConfig::parse("").unwrap(), DaemonConfig::default());
        assert!(DaemonConfig::parse("bogus = 1").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DaemonConfig::load(&dir.path().join("none.toml")).is_err());
    }
}
