//! Filesystem initialisation.

use slicefs_kv::{ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::{make_error_msg, MetaCode, Result};

use crate::counters::{self, Counter};
use crate::inode::Inode;
use crate::meta_store::{space_of, MetaStore};
use crate::types::ROOT_INODE;

/// Creates the root directory and seeds the counters unless the filesystem
/// already exists. Returns whether it was created.
pub async fn init_fs(txn: &mut dyn ReadWriteTransaction, store: &MetaStore) -> Result<bool> {
    if let Some(root) = Inode::load(&*txn, ROOT_INODE).await? {
        if !root.is_dir() {
            return make_error_msg(MetaCode::BAD_FILE_SYSTEM, "root inode is not a directory");
        }
        return Ok(false);
    }
    let root = Inode::root(store.now());
    root.store(txn).await?;
    counters::set(txn, Counter::NextInode, (ROOT_INODE + 1) as i64).await?;
    counters::set(txn, Counter::NextChunk, 1).await?;
    counters::set(txn, Counter::TotalInodes, 1).await?;
    counters::set(txn, Counter::UsedSpace, space_of(&root.attr)).await?;
    tracing::info!("init: created root directory");
    Ok(true)
}

/// Verifies that an initialised filesystem is present.
pub async fn check_fs<T: ReadOnlyTransaction + ?Sized>(txn: &T) -> Result<Inode> {
    match Inode::snapshot_load(txn, ROOT_INODE).await? {
        Some(root) if root.is_dir() => Ok(root),
        Some(_) => make_error_msg(MetaCode::BAD_FILE_SYSTEM, "root inode is not a directory"),
        None => make_error_msg(MetaCode::BAD_FILE_SYSTEM, "filesystem is not initialised"),
    }
}
