use crate::status::Status;
use crate::status_code::status_code_t;

pub type Result<T> = std::result::Result<T, Status>;

pub type Void = ();

pub fn make_error<T>(code: status_code_t) -> Result<T> {
    Err(Status::new(code))
}

pub fn make_error_msg<T>(code: status_code_t, msg: impl Into<String>) -> Result<T> {
    Err(Status::with_message(code, msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_code::{MetaCode, StatusCode};

    #[test]
    fn test_make_error() {
        let r: Result<u64> = make_error(MetaCode::NOT_FOUND);
        assert_eq!(r.unwrap_err().code(), MetaCode::NOT_FOUND);
    }

    #[test]
    fn test_make_error_msg() {
        let r: Result<()> = make_error_msg(StatusCode::INVALID_ARG, "zero length");
        let err = r.unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_ARG);
        assert_eq!(err.message(), Some("zero length"));
    }
}
