//! open and close.
//!
//! Open handles are counted per engine. Unlinking the last name of an open
//! file keeps the inode alive; the last close then deletes it.

use slicefs_kv::{ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::{make_error_msg, MetaCode, Result};

use crate::context::Context;
use crate::inode::Inode;
use crate::meta_store::{MetaStore, PostCommit};
use crate::ops::remove::delete_inode;
use crate::reclaim;
use crate::types::{Attr, Ino, MODE_MASK_R, MODE_MASK_W};

/// Access mask implied by open `flags`.
pub fn access_mask(flags: i32) -> u8 {
    let mut mask = match flags & libc::O_ACCMODE {
        libc::O_WRONLY => MODE_MASK_W,
        libc::O_RDWR => MODE_MASK_R | MODE_MASK_W,
        _ => MODE_MASK_R,
    };
    if flags & libc::O_TRUNC != 0 {
        mask |= MODE_MASK_W;
    }
    mask
}

/// Checks that `ctx` may open `ino` with `flags`.
pub async fn check_open<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    ctx: &Context,
    ino: Ino,
    flags: i32,
) -> Result<Attr> {
    let inode = Inode::load_existing(txn, ino).await?;
    let mask = access_mask(flags);
    if inode.is_dir() && mask & MODE_MASK_W != 0 {
        return make_error_msg(MetaCode::IS_DIRECTORY, format!("inode {}", ino));
    }
    inode.check_access(ctx, mask)?;
    Ok(inode.attr)
}

/// Deletes `ino` if it was unlinked while open. Runs after the last handle
/// of this engine closed.
pub async fn close_last(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    out: &mut PostCommit,
    ino: Ino,
) -> Result<()> {
    let sustained = reclaim::pack_sustained_key(store.sid(), ino);
    if txn.get(&sustained).await?.is_none() {
        return Ok(());
    }
    txn.clear(&sustained).await?;
    match Inode::load(&*txn, ino).await? {
        Some(inode) if inode.attr.nlink == 0 => {
            delete_inode(txn, store, out, &inode).await?;
            tracing::debug!(ino, "close: deleted unlinked inode");
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mask() {
        assert_eq!(access_mask(libc::O_RDONLY), MODE_MASK_R);
        assert_eq!(access_mask(libc::O_WRONLY), MODE_MASK_W);
        assert_eq!(access_mask(libc::O_RDWR), MODE_MASK_R | MODE_MASK_W);
        assert_eq!(access_mask(libc::O_RDONLY | libc::O_TRUNC), MODE_MASK_R | MODE_MASK_W);
    }
}
