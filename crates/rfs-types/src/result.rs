use crate::status::Status;
use crate::status_code::status_code_t;

/// Result type for operations that fail with a wire-level `Status`.
pub type Result<T> = std::result::Result<T, Status>;

pub fn make_error_msg<T>(code: status_code_t, msg: impl Into<String>) -> Result<T> {
    Err(Status::with_message(code, msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_code::StatusCode;

    #[test]
    fn test_make_error_msg() {
        let r: Result<u32> = make_error_msg(StatusCode::INVALID_ARG, "bad path");
        let err = r.unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_ARG);
        assert_eq!(err.message(), Some("bad path"));
    }
}
