use std::fmt;
use std::io;

use crate::status_code::{self, status_code_t, FileCode, StatusCode};

/// An error status carried across the wire: a numeric code plus an optional
/// description.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Status {
    code: status_code_t,
    message: Option<String>,
}

impl Status {
    pub fn new(code: status_code_t) -> Self {
        Self {
            code,
            message: None,
        }
    }

    pub fn with_message(code: status_code_t, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(msg.into()),
        }
    }

    /// Translate a local I/O failure into a status, keeping the OS description
    /// as the message.
    pub fn from_io(err: &io::Error) -> Self {
        let code = match err.kind() {
            io::ErrorKind::NotFound => FileCode::NOT_FOUND,
            io::ErrorKind::AlreadyExists => FileCode::EXISTS,
            io::ErrorKind::PermissionDenied => FileCode::NO_PERMISSION,
            io::ErrorKind::InvalidInput => StatusCode::INVALID_ARG,
            _ => match err.raw_os_error() {
                Some(21) => FileCode::IS_DIRECTORY,
                Some(20) => FileCode::NOT_DIRECTORY,
                Some(39) => FileCode::NOT_EMPTY,
                _ => StatusCode::IO_ERROR,
            },
        };
        Self::with_message(code, err.to_string())
    }

    pub fn code(&self) -> status_code_t {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::OK
    }

    /// Render as `"File::NotFound(3000) no such file"`.
    pub fn describe(&self) -> String {
        let name = status_code::to_string(self.code);
        match &self.message {
            Some(msg) => format!("{}({}) {}", name, self.code, msg),
            None => format!("{}({})", name, self.code),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl std::error::Error for Status {}

impl From<status_code_t> for Status {
    fn from(code: status_code_t) -> Self {
        Self::new(code)
    }
}

impl From<io::Error> for Status {
    fn from(err: io::Error) -> Self {
        Self::from_io(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_code::RPCCode;

    #[test]
    fn test_status_ok() {
        let s = Status::new(StatusCode::OK);
        assert!(s.is_ok());
        assert!(s.message().is_none());
        assert_eq!(s.describe(), "OK(0)");
    }

    #[test]
    fn test_status_with_message() {
        let s = Status::with_message(FileCode::NOT_FOUND, "no such file");
        assert!(!s.is_ok());
        assert_eq!(s.code(), 3000);
        assert_eq!(s.describe(), "File::NotFound(3000) no such file");
    }

    #[test]
    fn test_status_display() {
        let s = Status::new(RPCCode::TIMEOUT);
        assert_eq!(s.to_string(), "RPC::Timeout(2005)");
    }

    #[test]
    fn test_from_io_not_found() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let s = Status::from_io(&err);
        assert_eq!(s.code(), FileCode::NOT_FOUND);
        assert_eq!(s.message(), Some("gone"));
    }

    #[test]
    fn test_from_io_permission() {
        let s: Status = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert_eq!(s.code(), FileCode::NO_PERMISSION);
    }

    #[test]
    fn test_from_io_other() {
        let s: Status = io::Error::new(io::ErrorKind::Other, "disk on fire").into();
        assert_eq!(s.code(), StatusCode::IO_ERROR);
    }
}
