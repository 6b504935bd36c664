/// Numeric status code carried in error replies.
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Common status codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const NOT_IMPLEMENTED: status_code_t = 1;
    pub const INVALID_ARG: status_code_t = 3;
    pub const INVALID_CONFIG: status_code_t = 4;
    pub const INVALID_FORMAT: status_code_t = 33;
    pub const IO_ERROR: status_code_t = 69;
    pub const UNKNOWN: status_code_t = 999;
}

/// Transport status codes (2xxx).
pub mod RPCCode {
    use super::status_code_t;

    pub const INVALID_MESSAGE_TYPE: status_code_t = 2000;
    pub const TIMEOUT: status_code_t = 2005;
    pub const INVALID_ADDR: status_code_t = 2006;
    pub const SEND_FAILED: status_code_t = 2007;
    pub const SOCKET_CLOSED: status_code_t = 2013;
    pub const CONNECT_FAILED: status_code_t = 2014;
    pub const CANCELLED: status_code_t = 2030;
}

/// Agent-side file operation codes (3xxx).
pub mod FileCode {
    use super::status_code_t;

    pub const NOT_FOUND: status_code_t = 3000;
    pub const EXISTS: status_code_t = 3001;
    pub const NO_PERMISSION: status_code_t = 3002;
    pub const IS_DIRECTORY: status_code_t = 3003;
    pub const NOT_DIRECTORY: status_code_t = 3004;
    pub const INVALID_PATH: status_code_t = 3005;
    pub const NOT_EMPTY: status_code_t = 3006;
    pub const TOO_LARGE: status_code_t = 3007;
}

/// Client-side cache codes (4xxx).
pub mod CacheCode {
    use super::status_code_t;

    pub const INVALID_DESCRIPTOR: status_code_t = 4000;
    pub const LOCAL_IO_FAILED: status_code_t = 4001;
    pub const DIVERGED: status_code_t = 4002;
}

/// Human-readable name for a status code.
pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::NOT_IMPLEMENTED => "NotImplemented",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::INVALID_CONFIG => "InvalidConfig",
        StatusCode::INVALID_FORMAT => "InvalidFormat",
        StatusCode::IO_ERROR => "IOError",
        StatusCode::UNKNOWN => "Unknown",

        RPCCode::INVALID_MESSAGE_TYPE => "RPC::InvalidMessageType",
        RPCCode::TIMEOUT => "RPC::Timeout",
        RPCCode::INVALID_ADDR => "RPC::InvalidAddr",
        RPCCode::SEND_FAILED => "RPC::SendFailed",
        RPCCode::SOCKET_CLOSED => "RPC::SocketClosed",
        RPCCode::CONNECT_FAILED => "RPC::ConnectFailed",
        RPCCode::CANCELLED => "RPC::Cancelled",

        FileCode::NOT_FOUND => "File::NotFound",
        FileCode::EXISTS => "File::Exists",
        FileCode::NO_PERMISSION => "File::NoPermission",
        FileCode::IS_DIRECTORY => "File::IsDirectory",
        FileCode::NOT_DIRECTORY => "File::NotDirectory",
        FileCode::INVALID_PATH => "File::InvalidPath",
        FileCode::NOT_EMPTY => "File::NotEmpty",
        FileCode::TOO_LARGE => "File::TooLarge",

        CacheCode::INVALID_DESCRIPTOR => "Cache::InvalidDescriptor",
        CacheCode::LOCAL_IO_FAILED => "Cache::LocalIOFailed",
        CacheCode::DIVERGED => "Cache::Diverged",

        _ => "Unrecognized",
    }
}
