use std::fmt;

use crate::status_code::{self, StatusCode, TransactionCode, status_code_t};

/// Outcome of a failed engine call: a numeric code plus an optional detail
/// message. Codes are grouped by family in [`crate::status_code`].
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

    pub fn code(&self) -> status_code_t {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::OK
    }

    /// Whether the transaction that produced this status may be re-run.
    pub fn is_retryable(&self) -> bool {
        TransactionCode::is_retryable(self.code)
    }

    /// POSIX errno for this status.
    pub fn errno(&self) -> i32 {
        status_code::to_errno(self.code)
    }

    /// Renders as `"Meta::NotFound(3000) detail"`.
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_code::MetaCode;

    #[test]
    fn test_describe() {
        let s = Status::with_message(MetaCode::EXISTS, "name taken");
        assert!(!s.is_ok());
        assert_eq!(s.describe(), "Meta::Exists(3007) name taken");
        assert_eq!(Status::new(StatusCode::OK).describe(), "OK(0)");
    }

    #[test]
    fn test_errno_and_retry() {
        let s: Status = MetaCode::NOT_EMPTY.into();
        assert_eq!(s.errno(), libc::ENOTEMPTY);
        assert!(!s.is_retryable());
        assert!(Status::new(TransactionCode::CONFLICT).is_retryable());
    }

    #[test]
    fn test_as_std_error() {
        let s = Status::new(StatusCode::INTERRUPTED);
        let e: &dyn std::error::Error = &s;
        assert!(e.to_string().starts_with("Interrupted"));
    }
}
