use std::path::PathBuf;
use std::time::Duration;

use rfs_config::{Config, ConfigError};
use rfs_logging::LogConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding the cache files. Created if missing.
    pub cache_root: PathBuf,

    /// Soft limit: exceeding it is logged, nothing is evicted.
    pub capacity_bytes: u64,

    /// Number of fetch lock buckets.
    pub lock_buckets: usize,

    /// Delete leftover cache files at startup.
    pub clean_on_start: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("/var/cache/rfs"),
            capacity_bytes: 10 << 30,
            lock_buckets: 1024,
            clean_on_start: true,
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("cache.cache_root must be set".into()));
        }
        if self.lock_buckets == 0 {
            return Err(ConfigError::Invalid("cache.lock_buckets must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Agents to connect to at startup (`host:port`).
    pub endpoints: Vec<String>,

    /// Deadline for a single request.
    #[serde(with = "rfs_config::duration_secs")]
    pub rpc_timeout: Duration,

    pub cache: CacheConfig,

    pub log: LogConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            rpc_timeout: Duration::from_secs(30),
            cache: CacheConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config for ClientConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_timeout.is_zero() {
            return Err(ConfigError::Invalid("rpc_timeout must be positive".into()));
        }
        if let Some(bad) = self.endpoints.iter().find(|e| e.rsplit_once(':').is_none()) {
            return Err(ConfigError::Invalid(format!("endpoint {bad:?} is not host:port")));
        }
        self.cache.validate()
    }

    fn hot_update(&mut self, new: &Self) {
        self.rpc_timeout = new.rpc_timeout;
        self.cache.capacity_bytes = new.cache.capacity_bytes;
        self.log.level = new.log.level.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.rpc_timeout, Duration::from_secs(30));
        assert_eq!(cfg.cache.capacity_bytes, 10 * 1024 * 1024 * 1024);
        assert_eq!(cfg.cache.lock_buckets, 1024);
        assert!(cfg.cache.clean_on_start);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_from_toml() {
        let cfg = ClientConfig::from_toml_str(
            r#"
endpoints = ["10.0.0.1:7070", "10.0.0.2:7070"]
rpc_timeout = 2.5

[cache]
cache_root = "/tmp/rfs"
lock_buckets = 64
"#,
        )
        .unwrap();
        assert_eq!(cfg.endpoints.len(), 2);
        assert_eq!(cfg.rpc_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.cache.cache_root, PathBuf::from("/tmp/rfs"));
        assert_eq!(cfg.cache.lock_buckets, 64);
        assert_eq!(cfg.cache.capacity_bytes, CacheConfig::default().capacity_bytes);
    }

    #[test]
    fn test_validation() {
        assert!(ClientConfig::from_toml_str("rpc_timeout = 0\n").is_err());
        assert!(ClientConfig::from_toml_str("endpoints = [\"no-port\"]\n").is_err());
        assert!(ClientConfig::from_toml_str("[cache]\nlock_buckets = 0\n").is_err());
    }

    #[test]
    fn test_hot_update_leaves_cache_root() {
        let mut cfg = ClientConfig::default();
        let mut new = ClientConfig::default();
        new.rpc_timeout = Duration::from_secs(1);
        new.cache.cache_root = PathBuf::from("/elsewhere");
        cfg.hot_update(&new);
        assert_eq!(cfg.rpc_timeout, Duration::from_secs(1));
        assert_eq!(cfg.cache.cache_root, CacheConfig::default().cache_root);
    }
}
