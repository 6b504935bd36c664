//! Configuration plumbing shared by the agent and the client.
//!
//! Config structs are plain serde types with a `Default`; implementing
//! [`Config`] adds validation and the set of fields that may change at
//! runtime. [`ConfigManager`] owns the live value.

mod manager;
pub mod duration_secs;

pub use manager::ConfigManager;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub trait Config: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Apply the runtime-changeable part of `new` onto `self`.
    ///
    /// The default takes everything.
    fn hot_update(&mut self, new: &Self) {
        *self = new.clone();
    }

    fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
