//! Individual metadata operations.
//!
//! Each operation runs inside one store transaction supplied by the caller
//! and records its post-commit work in a [`PostCommit`].
//!
//! [`PostCommit`]: crate::meta_store::PostCommit

pub mod chunk_ops;
pub mod create;
pub mod init;
pub mod list;
pub mod lookup;
pub mod open;
pub mod remove;
pub mod rename;
pub mod set_attr;
pub mod stat_fs;
pub mod truncate;
pub mod xattr_ops;

use slicefs_types::{make_error_msg, MetaCode, Result};

use crate::dir_entry::{is_dot_or_dotdot, validate_name};
use crate::meta_store::MetaStore;

/// Validates `name` as the name of a new entry; `.` and `..` already exist.
pub(crate) fn check_new_name(store: &MetaStore, name: &[u8]) -> Result<()> {
    if is_dot_or_dotdot(name) {
        return make_error_msg(
            MetaCode::EXISTS,
            String::from_utf8_lossy(name).into_owned(),
        );
    }
    validate_name(name, store.config().max_name_len)
}
