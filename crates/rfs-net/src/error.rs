use rfs_types::{status_code_t, RPCCode, Status, StatusCode};
use thiserror::Error;

/// Errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum NetError {
    /// The peer closed the connection, or the connection failed while a
    /// request was outstanding on it.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// No reply arrived before the request deadline.
    #[error("timeout")]
    Timeout,

    /// The sender was disconnected while the request was waiting.
    #[error("request cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// The low byte of the checksum is not the frame magic.
    #[error("invalid frame magic: {0:#04x}")]
    InvalidMagic(u8),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("incomplete frame: need {need} bytes, have {have}")]
    IncompleteHeader { need: usize, have: usize },

    /// The receiver has been unbound.
    #[error("transport shutting down")]
    ShuttingDown,

    /// A reply was addressed to a peer that is no longer connected.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("wire error: {0}")]
    Wire(#[from] rfs_serde::WireError),

    /// The agent executed the request and answered with an error status.
    #[error("remote error: {0}")]
    Remote(#[from] Status),
}

impl NetError {
    /// Status code used when this error has to be reported as a `Status`.
    pub fn code(&self) -> status_code_t {
        match self {
            NetError::ConnectionClosed => RPCCode::SOCKET_CLOSED,
            NetError::ConnectionRefused(_) => RPCCode::CONNECT_FAILED,
            NetError::Timeout => RPCCode::TIMEOUT,
            NetError::Cancelled | NetError::ShuttingDown => RPCCode::CANCELLED,
            NetError::Io(_) => RPCCode::SEND_FAILED,
            NetError::ChecksumMismatch { .. }
            | NetError::InvalidMagic(_)
            | NetError::MessageTooLarge { .. }
            | NetError::IncompleteHeader { .. } => RPCCode::INVALID_MESSAGE_TYPE,
            NetError::UnknownPeer(_) | NetError::InvalidAddress(_) => RPCCode::INVALID_ADDR,
            NetError::Wire(_) => StatusCode::INVALID_FORMAT,
            NetError::Remote(status) => status.code(),
        }
    }
}

impl From<NetError> for Status {
    fn from(err: NetError) -> Self {
        match err {
            NetError::Remote(status) => status,
            other => Status::with_message(other.code(), other.to_string()),
        }
    }
}
