/// Numeric status code carried by [`crate::Status`].
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Generic codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const DATA_CORRUPTION: status_code_t = 2;
    pub const INVALID_ARG: status_code_t = 3;
    pub const INTERRUPTED: status_code_t = 27;
    pub const READ_ONLY_MODE: status_code_t = 34;
    pub const IO_ERROR: status_code_t = 69;
    pub const TEMPORARILY_UNAVAILABLE: status_code_t = 73;
}

/// Store transaction codes (1xxx).
pub mod TransactionCode {
    use super::status_code_t;

    pub const CONFLICT: status_code_t = 1001;
    pub const THROTTLED: status_code_t = 1002;
    pub const TOO_OLD: status_code_t = 1003;
    pub const NETWORK_ERROR: status_code_t = 1004;
    pub const RETRYABLE: status_code_t = 1007;
    pub const RESOURCE_CONSTRAINED: status_code_t = 1008;

    /// Whether a failed transaction may be re-run from scratch.
    pub fn is_retryable(code: status_code_t) -> bool {
        matches!(
            code,
            CONFLICT | THROTTLED | TOO_OLD | NETWORK_ERROR | RETRYABLE | RESOURCE_CONSTRAINED
        )
    }
}

/// Metadata engine codes (3xxx).
pub mod MetaCode {
    use super::status_code_t;

    pub const NOT_FOUND: status_code_t = 3000;
    pub const NOT_EMPTY: status_code_t = 3001;
    pub const NOT_DIRECTORY: status_code_t = 3003;
    pub const IS_DIRECTORY: status_code_t = 3006;
    pub const EXISTS: status_code_t = 3007;
    pub const NO_PERMISSION: status_code_t = 3008;
    pub const INCONSISTENT: status_code_t = 3009;
    pub const BAD_FILE_SYSTEM: status_code_t = 3011;
    pub const INODE_ID_ALLOC_FAILED: status_code_t = 3012;
    pub const NAME_TOO_LONG: status_code_t = 3017;
    pub const WOULD_BLOCK: status_code_t = 3020;
    pub const NOT_SUPPORTED: status_code_t = 3021;
    pub const NO_SPACE: status_code_t = 3022;
    pub const NO_ATTR: status_code_t = 3025;
    pub const TOO_MANY_LINKS: status_code_t = 3026;
    pub const NOT_PERMITTED: status_code_t = 3027;
    pub const TOO_BIG: status_code_t = 3028;
    pub const NOTIFY_FAILED: status_code_t = 3029;
    pub const FILE_TOO_LARGE: status_code_t = 3102;
    pub const FOUND_BUG: status_code_t = 3999;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum StatusCodeType {
    Invalid = -1,
    Common = 0,
    Transaction = 1,
    Meta = 3,
}

pub fn type_of(code: status_code_t) -> StatusCodeType {
    match code {
        0..=999 => StatusCodeType::Common,
        1000..=1999 => StatusCodeType::Transaction,
        3000..=3999 => StatusCodeType::Meta,
        _ => StatusCodeType::Invalid,
    }
}

/// Human-readable name of a status code.
pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::DATA_CORRUPTION => "DataCorruption",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::INTERRUPTED => "Interrupted",
        StatusCode::READ_ONLY_MODE => "ReadOnlyMode",
        StatusCode::IO_ERROR => "IOError",
        StatusCode::TEMPORARILY_UNAVAILABLE => "TemporarilyUnavailable",

        TransactionCode::CONFLICT => "Transaction::Conflict",
        TransactionCode::THROTTLED => "Transaction::Throttled",
        TransactionCode::TOO_OLD => "Transaction::TooOld",
        TransactionCode::NETWORK_ERROR => "Transaction::NetworkError",
        TransactionCode::RETRYABLE => "Transaction::Retryable",
        TransactionCode::RESOURCE_CONSTRAINED => "Transaction::ResourceConstrained",

        MetaCode::NOT_FOUND => "Meta::NotFound",
        MetaCode::NOT_EMPTY => "Meta::NotEmpty",
        MetaCode::NOT_DIRECTORY => "Meta::NotDirectory",
        MetaCode::IS_DIRECTORY => "Meta::IsDirectory",
        MetaCode::EXISTS => "Meta::Exists",
        MetaCode::NO_PERMISSION => "Meta::NoPermission",
        MetaCode::INCONSISTENT => "Meta::Inconsistent",
        MetaCode::BAD_FILE_SYSTEM => "Meta::BadFileSystem",
        MetaCode::INODE_ID_ALLOC_FAILED => "Meta::InodeIdAllocFailed",
        MetaCode::NAME_TOO_LONG => "Meta::NameTooLong",
        MetaCode::WOULD_BLOCK => "Meta::WouldBlock",
        MetaCode::NOT_SUPPORTED => "Meta::NotSupported",
        MetaCode::NO_SPACE => "Meta::NoSpace",
        MetaCode::NO_ATTR => "Meta::NoAttr",
        MetaCode::TOO_MANY_LINKS => "Meta::TooManyLinks",
        MetaCode::NOT_PERMITTED => "Meta::NotPermitted",
        MetaCode::TOO_BIG => "Meta::TooBig",
        MetaCode::NOTIFY_FAILED => "Meta::NotifyFailed",
        MetaCode::FILE_TOO_LARGE => "Meta::FileTooLarge",
        MetaCode::FOUND_BUG => "Meta::FoundBug",

        _ => "UnknownStatusCode",
    }
}

/// POSIX errno reported to the kernel adapter for a status code.
pub fn to_errno(code: status_code_t) -> i32 {
    if type_of(code) == StatusCodeType::Transaction {
        return libc::EIO;
    }

    match code {
        StatusCode::OK => 0,
        StatusCode::INVALID_ARG => libc::EINVAL,
        StatusCode::READ_ONLY_MODE => libc::EROFS,
        StatusCode::INTERRUPTED => libc::EINTR,
        StatusCode::TEMPORARILY_UNAVAILABLE => libc::EAGAIN,

        MetaCode::NOT_FOUND => libc::ENOENT,
        MetaCode::NOT_EMPTY => libc::ENOTEMPTY,
        MetaCode::NOT_DIRECTORY => libc::ENOTDIR,
        MetaCode::IS_DIRECTORY => libc::EISDIR,
        MetaCode::EXISTS => libc::EEXIST,
        MetaCode::NO_PERMISSION => libc::EACCES,
        MetaCode::NOT_PERMITTED => libc::EPERM,
        MetaCode::NAME_TOO_LONG => libc::ENAMETOOLONG,
        MetaCode::WOULD_BLOCK => libc::EAGAIN,
        MetaCode::NOT_SUPPORTED => libc::EOPNOTSUPP,
        MetaCode::NO_SPACE => libc::ENOSPC,
        MetaCode::NO_ATTR => libc::ENODATA,
        MetaCode::TOO_MANY_LINKS => libc::EMLINK,
        MetaCode::TOO_BIG => libc::E2BIG,
        MetaCode::FILE_TOO_LARGE => libc::EFBIG,

        _ => libc::EIO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_of() {
        assert_eq!(type_of(StatusCode::OK), StatusCodeType::Common);
        assert_eq!(type_of(TransactionCode::CONFLICT), StatusCodeType::Transaction);
        assert_eq!(type_of(MetaCode::WOULD_BLOCK), StatusCodeType::Meta);
        assert_eq!(type_of(2005), StatusCodeType::Invalid);
    }

    #[test]
    fn test_to_string() {
        assert_eq!(to_string(StatusCode::INVALID_ARG), "InvalidArg");
        assert_eq!(to_string(TransactionCode::CONFLICT), "Transaction::Conflict");
        assert_eq!(to_string(MetaCode::NO_ATTR), "Meta::NoAttr");
        assert_eq!(to_string(12345), "UnknownStatusCode");
    }

    #[test]
    fn test_retryable() {
        assert!(TransactionCode::is_retryable(TransactionCode::CONFLICT));
        assert!(TransactionCode::is_retryable(TransactionCode::TOO_OLD));
        assert!(!TransactionCode::is_retryable(StatusCode::TEMPORARILY_UNAVAILABLE));
        assert!(!TransactionCode::is_retryable(MetaCode::EXISTS));
    }

    #[test]
    fn test_to_errno() {
        assert_eq!(to_errno(StatusCode::OK), 0);
        assert_eq!(to_errno(MetaCode::NOT_FOUND), libc::ENOENT);
        assert_eq!(to_errno(MetaCode::NO_PERMISSION), libc::EACCES);
        assert_eq!(to_errno(MetaCode::NOT_PERMITTED), libc::EPERM);
        assert_eq!(to_errno(MetaCode::WOULD_BLOCK), libc::EAGAIN);
        assert_eq!(to_errno(StatusCode::INTERRUPTED), libc::EINTR);
        assert_eq!(to_errno(MetaCode::NO_ATTR), libc::ENODATA);
        assert_eq!(to_errno(MetaCode::TOO_MANY_LINKS), libc::EMLINK);
        assert_eq!(to_errno(MetaCode::NOTIFY_FAILED), libc::EIO);
        assert_eq!(to_errno(TransactionCode::CONFLICT), libc::EIO);
    }
}
