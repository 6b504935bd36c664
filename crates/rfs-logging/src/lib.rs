use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Layer, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Hourly,
    Daily,
    Never,
}

impl From<LogRotation> for rolling::Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => rolling::Rotation::HOURLY,
            LogRotation::Daily => rolling::Rotation::DAILY,
            LogRotation::Never => rolling::Rotation::NEVER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive (`info`, `rfs_cache=debug,warn`, ...). `RUST_LOG`
    /// wins when set.
    pub level: String,

    /// Directory for rolling log files. No file output when unset.
    pub log_dir: Option<PathBuf>,

    pub file_prefix: String,

    pub rotation: LogRotation,

    pub json_format: bool,

    /// Also log to stderr.
    pub console_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".into(),
            log_dir: None,
            file_prefix: "rfs".into(),
            rotation: LogRotation::Hourly,
            json_format: false,
            console_output: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log filter {0:?}: {1}")]
    Filter(String, tracing_subscriber::filter::ParseError),

    #[error("cannot create log file appender: {0}")]
    Appender(#[from] rolling::InitError),

    #[error("global subscriber already installed: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),

    #[error("cannot swap log filter: {0}")]
    Reload(#[from] reload::Error),
}

/// Keeps the logging pipeline alive and lets the filter change at runtime.
///
/// Dropping it flushes and stops the file writer.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    _guard: Option<WorkerGuard>,
}

impl LogHandle {
    /// Re-apply `config.level`. `RUST_LOG` still wins when set.
    pub fn reload(&self, config: &LogConfig) -> Result<(), LogError> {
        let filter = build_filter(config)?;
        let current = self.current_filter()?;
        let next = filter.to_string();
        if current != next {
            self.filter.reload(filter)?;
            tracing::info!(old = %current, new = %next, "log filter changed");
        }
        Ok(())
    }

    pub fn current_filter(&self) -> Result<String, LogError> {
        Ok(self.filter.with_current(|filter| filter.to_string())?)
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn build_filter(config: &LogConfig) -> Result<EnvFilter, LogError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| LogError::Filter(config.level.clone(), e)),
    }
}

fn console_layer(config: &LogConfig) -> Option<BoxedLayer> {
    if !config.console_output {
        return None;
    }
    let layer = fmt::layer().with_writer(std::io::stderr);
    Some(if config.json_format {
        layer.json().boxed()
    } else {
        layer.boxed()
    })
}

fn file_layer(config: &LogConfig) -> Result<Option<(BoxedLayer, WorkerGuard)>, LogError> {
    let Some(log_dir) = &config.log_dir else {
        return Ok(None);
    };
    let appender = rolling::RollingFileAppender::builder()
        .rotation(config.rotation.into())
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .build(log_dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer().with_ansi(false).with_writer(writer);
    let layer = if config.json_format {
        layer.json().boxed()
    } else {
        layer.boxed()
    };
    Ok(Some((layer, guard)))
}

/// Install the global subscriber. Call once at startup and keep the returned
/// handle alive until exit, or buffered file output is lost.
pub fn init_logging(config: &LogConfig) -> Result<LogHandle, LogError> {
    let (filter, handle) = reload::Layer::new(build_filter(config)?);
    let (file, guard) = match file_layer(config)? {
        Some((layer, guard)) => (Some(layer), Some(guard)),
        None => (None, None),
    };

    let layers: Vec<BoxedLayer> = console_layer(config).into_iter().chain(file).collect();
    tracing_subscriber::registry()
        .with(layers.with_filter(filter))
        .try_init()?;
    tracing::debug!(level = %config.level, file = guard.is_some(), "logging initialized");
    Ok(LogHandle {
        filter: handle,
        _guard: guard,
    })
}
