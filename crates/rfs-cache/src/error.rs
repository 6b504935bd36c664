use std::io;

use rfs_net::NetError;
use rfs_proto::PayloadType;
use rfs_types::{status_code_t, CacheCode, Fd, Status};

/// Failure of a cache manager operation.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The agent ran the operation and it failed there. Nothing changed
    /// locally.
    #[error("remote error: {0}")]
    Remote(Status),

    /// The request never completed. Whether the agent applied it is unknown.
    #[error("transport error: {0}")]
    Transport(NetError),

    /// A local cache operation failed before anything was sent, or while
    /// only reading.
    #[error("local cache error: {0}")]
    LocalCache(#[from] io::Error),

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(Fd),

    /// The agent applied the change but the cache could not follow.
    #[error("{op} of {key} applied remotely but the cache failed: {source}")]
    Diverged {
        op: &'static str,
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("unexpected {0:?} reply")]
    UnexpectedReply(PayloadType),
}

impl CacheError {
    /// Whether the agent is known to have applied the operation.
    pub fn remote_applied(&self) -> bool {
        matches!(self, CacheError::Diverged { .. })
    }

    pub fn code(&self) -> status_code_t {
        match self {
            CacheError::Remote(status) => status.code(),
            CacheError::Transport(err) => err.code(),
            CacheError::LocalCache(_) => CacheCode::LOCAL_IO_FAILED,
            CacheError::InvalidDescriptor(_) => CacheCode::INVALID_DESCRIPTOR,
            CacheError::Diverged { .. } => CacheCode::DIVERGED,
            CacheError::UnexpectedReply(_) => rfs_types::RPCCode::INVALID_MESSAGE_TYPE,
        }
    }
}

impl From<NetError> for CacheError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::Remote(status) => CacheError::Remote(status),
            other => CacheError::Transport(other),
        }
    }
}

impl From<CacheError> for Status {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Remote(status) => status,
            other => Status::with_message(other.code(), other.to_string()),
        }
    }
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rfs_types::{FileCode, RPCCode};

    #[test]
    fn test_net_error_split() {
        let remote = CacheError::from(NetError::Remote(Status::new(FileCode::NOT_FOUND)));
        assert!(matches!(remote, CacheError::Remote(_)));
        assert_eq!(remote.code(), FileCode::NOT_FOUND);

        let transport = CacheError::from(NetError::Timeout);
        assert!(matches!(transport, CacheError::Transport(NetError::Timeout)));
        assert_eq!(transport.code(), RPCCode::TIMEOUT);
    }

    #[test]
    fn test_remote_applied() {
        let diverged = CacheError::Diverged {
            op: "remove",
            key: "h:1@/a".into(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(diverged.remote_applied());
        assert!(diverged.to_string().contains("h:1@/a"));
        assert!(!CacheError::InvalidDescriptor(Fd(3)).remote_applied());
        assert_eq!(Status::from(diverged).code(), CacheCode::DIVERGED);
    }
}
