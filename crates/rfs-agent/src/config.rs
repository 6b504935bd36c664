use std::net::SocketAddr;
use std::path::PathBuf;

use rfs_config::{Config, ConfigError};
use rfs_logging::LogConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// `host:port` to accept client connections on.
    pub listen: String,

    /// Remote paths are resolved below this directory.
    pub root: PathBuf,

    pub log: LogConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:7070".into(),
            root: PathBuf::from("/"),
            log: LogConfig::default(),
        }
    }
}

impl Config for AgentConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "listen must be ip:port, got {:?}",
                self.listen
            )));
        }
        if !self.root.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "root must be absolute, got {}",
                self.root.display()
            )));
        }
        Ok(())
    }

    /// Only the log level can change without a restart.
    fn hot_update(&mut self, new: &Self) {
        self.log.level = new.log.level.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.listen, "0.0.0.0:7070");
        assert_eq!(cfg.root, PathBuf::from("/"));
        cfg.validate().unwrap();
    }

    #[test]
    fn test_from_toml() {
        let cfg = AgentConfig::from_toml_str(
            "listen = \"127.0.0.1:9000\"\nroot = \"/srv/export\"\n[log]\nlevel = \"debug\"\n",
        )
        .unwrap();
        assert_eq!(cfg.listen, "127.0.0.1:9000");
        assert_eq!(cfg.root, PathBuf::from("/srv/export"));
        assert_eq!(cfg.log.level, "debug");
    }

    #[test]
    fn test_invalid_values() {
        assert!(AgentConfig::from_toml_str("listen = \"nowhere\"\n").is_err());
        assert!(AgentConfig::from_toml_str("root = \"relative/dir\"\n").is_err());
    }

    #[test]
    fn test_hot_update_keeps_listen() {
        let mut cfg = AgentConfig::default();
        let mut new = AgentConfig::default();
        new.listen = "127.0.0.1:1".into();
        new.log.level = "trace".into();
        cfg.hot_update(&new);
        assert_eq!(cfg.listen, "0.0.0.0:7070");
        assert_eq!(cfg.log.level, "trace");
    }
}
