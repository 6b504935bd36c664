//! Addressable key for a file living on a remote agent.
//!
//! The canonical form `host:port@path` doubles as the cache index key and as
//! the string carried on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A `(hostname, port, path)` triple. Immutable; use [`RemotePath::with_path`]
/// or [`RemotePath::join`] to derive a new one.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawRemotePath")]
pub struct RemotePath {
    hostname: String,
    port: u16,
    path: String,
}

impl RemotePath {
    /// Build from parts already known to be valid. Use
    /// [`RemotePath::try_new`] for anything user supplied.
    pub fn new(hostname: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        let hostname = hostname.into();
        debug_assert!(check_hostname(&hostname).is_ok(), "bad hostname {hostname:?}");
        Self {
            hostname,
            port,
            path: path.into(),
        }
    }

    /// Build from parts, rejecting a hostname that would not survive
    /// `parse(key())`: an empty one, or one containing `@`.
    pub fn try_new(
        hostname: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Result<Self, RemotePathParseError> {
        let hostname = hostname.into();
        check_hostname(&hostname)?;
        Ok(Self {
            hostname,
            port,
            path: path.into(),
        })
    }

    /// Parse `host:port@path`. Inverse of [`RemotePath::key`].
    pub fn parse(s: &str) -> Result<Self, RemotePathParseError> {
        let (address, path) = s.split_once('@').ok_or(RemotePathParseError::MissingPath)?;
        let (hostname, port) = address
            .rsplit_once(':')
            .ok_or(RemotePathParseError::MissingPort)?;
        check_hostname(hostname)?;
        let port: u16 = port
            .parse()
            .map_err(|_| RemotePathParseError::InvalidPort(port.to_string()))?;
        Self::try_new(hostname, port, path)
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Canonical cache key, `host:port@path`.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// `host:port`, the routing part of the key.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    /// Same agent, different path.
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self::new(self.hostname.clone(), self.port, path)
    }

    /// Child entry `name` of this directory path.
    pub fn join(&self, name: &str) -> Self {
        let child = if self.path.is_empty() {
            name.to_string()
        } else if self.path.ends_with('/') {
            format!("{}{}", self.path, name)
        } else {
            format!("{}/{}", self.path, name)
        };
        self.with_path(child)
    }
}

fn check_hostname(hostname: &str) -> Result<(), RemotePathParseError> {
    if hostname.is_empty() {
        return Err(RemotePathParseError::MissingHost);
    }
    if hostname.contains('@') {
        return Err(RemotePathParseError::InvalidHost(hostname.to_string()));
    }
    Ok(())
}

#[derive(Deserialize)]
struct RawRemotePath {
    hostname: String,
    port: u16,
    path: String,
}

impl TryFrom<RawRemotePath> for RemotePath {
    type Error = RemotePathParseError;

    fn try_from(raw: RawRemotePath) -> Result<Self, Self::Error> {
        Self::try_new(raw.hostname, raw.port, raw.path)
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.hostname, self.port, self.path)
    }
}

impl fmt::Debug for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemotePath({})", self)
    }
}

impl FromStr for RemotePath {
    type Err = RemotePathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemotePathParseError {
    #[error("missing '@' path separator")]
    MissingPath,
    #[error("missing ':' port separator")]
    MissingPort,
    #[error("missing host name")]
    MissingHost,
    #[error("invalid host name: {0:?}")]
    InvalidHost(String),
    #[error("invalid port number: {0:?}")]
    InvalidPort(String),
}
