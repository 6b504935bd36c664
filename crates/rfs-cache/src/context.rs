use std::sync::Arc;

use rfs_config::{ConfigError, ConfigManager};
use rfs_net::{AsyncConnector, Sender, Socket};

use crate::config::ClientConfig;
use crate::error::CacheResult;
use crate::manager::DiskCacheManager;

/// Everything a client process needs: the request sender and the cache
/// manager built on top of it.
pub struct ClientContext<S: Socket> {
    config: ConfigManager<ClientConfig>,
    sender: Arc<Sender<S>>,
    cache: Arc<DiskCacheManager>,
}

impl<S: Socket> ClientContext<S> {
    /// Connect to the configured endpoints and prepare the cache root.
    pub async fn new(
        config: ClientConfig,
        connector: Arc<dyn AsyncConnector<S>>,
    ) -> CacheResult<Self> {
        Self::with_config_manager(ConfigManager::new(config), connector).await
    }

    /// Like [`ClientContext::new`], keeping `manager` so a file-backed
    /// config can be reloaded later.
    pub async fn with_config_manager(
        manager: ConfigManager<ClientConfig>,
        connector: Arc<dyn AsyncConnector<S>>,
    ) -> CacheResult<Self> {
        let config = manager.get();
        let sender = Arc::new(Sender::new(connector, config.rpc_timeout));
        sender.connect(&config.endpoints).await?;
        let cache = DiskCacheManager::new(sender.clone(), &config.cache).await?;
        tracing::info!(
            endpoints = config.endpoints.len(),
            rpc_timeout_ms = config.rpc_timeout.as_millis() as u64,
            "client context ready"
        );
        Ok(Self {
            config: manager,
            sender,
            cache: Arc::new(cache),
        })
    }

    pub fn cache(&self) -> &Arc<DiskCacheManager> {
        &self.cache
    }

    pub fn sender(&self) -> &Arc<Sender<S>> {
        &self.sender
    }

    pub fn config(&self) -> Arc<ClientConfig> {
        self.config.get()
    }

    /// Re-read the config file and apply the request timeout and cache
    /// capacity. The log level belongs to whoever owns the
    /// `rfs_logging::LogHandle`.
    pub fn reload_config(&self) -> Result<(), ConfigError> {
        self.config.reload()?;
        let config = self.config.get();
        self.sender.set_timeout(config.rpc_timeout);
        self.cache.set_capacity(config.cache.capacity_bytes);
        Ok(())
    }

    /// Drop all connections. Requests still in flight fail with
    /// `Cancelled`.
    pub async fn shutdown(&self) {
        self.sender.disconnect().await;
        tracing::info!(open_files = self.cache.open_files().len(), "client context shut down");
    }
}
