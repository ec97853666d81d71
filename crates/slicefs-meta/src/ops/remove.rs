//! unlink and rmdir, and the release of inodes whose last link is gone.

use slicefs_kv::ReadWriteTransaction;
use slicefs_types::{make_error_msg, MetaCode, Result, Status, StatusCode};

use crate::context::Context;
use crate::dir_entry::{validate_name, DirEntry};
use crate::inode::Inode;
use crate::lock::{flock, plock};
use crate::meta_store::{space_of, MetaStore, PostCommit};
use crate::reclaim;
use crate::types::Ino;
use crate::xattr;

pub async fn unlink(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    ctx: &Context,
    out: &mut PostCommit,
    parent: Ino,
    name: &[u8],
) -> Result<()> {
    if name == b"." || name == b".." {
        return make_error_msg(MetaCode::IS_DIRECTORY, "cannot unlink a dot entry");
    }
    validate_name(name, store.config().max_name_len)?;
    let mut dir = Inode::load_dir(&*txn, parent).await?;
    dir.check_modify_dir(ctx)?;
    let entry = load_entry(&*txn, parent, name).await?;
    if entry.is_dir() {
        return make_error_msg(MetaCode::IS_DIRECTORY, String::from_utf8_lossy(name).into_owned());
    }
    let inode = Inode::load(&*txn, entry.inode).await?;
    if let Some(inode) = &inode {
        if dir.sticky_denies(ctx, inode) {
            return make_error_msg(MetaCode::NOT_PERMITTED, "sticky directory");
        }
    }

    let now = store.now();
    entry.remove(txn).await?;
    dir.attr.touch_mtime(now);
    dir.store(txn).await?;

    match inode {
        Some(mut inode) => {
            inode.attr.nlink = inode.attr.nlink.saturating_sub(1);
            inode.attr.touch_ctime(now);
            if inode.attr.nlink > 0 {
                inode.store(txn).await?;
            } else {
                release_inode(txn, store, out, inode).await?;
            }
        }
        None => {
            tracing::warn!(parent, ino = entry.inode, "unlink: entry pointed at a missing inode");
        }
    }
    tracing::debug!(parent, name = %String::from_utf8_lossy(name), ino = entry.inode, "unlink: removed entry");
    Ok(())
}

pub async fn rmdir(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    ctx: &Context,
    out: &mut PostCommit,
    parent: Ino,
    name: &[u8],
) -> Result<()> {
    match name {
        b"." => return make_error_msg(StatusCode::INVALID_ARG, "cannot remove '.'"),
        b".." => return make_error_msg(MetaCode::NOT_EMPTY, "cannot remove '..'"),
        _ => {}
    }
    validate_name(name, store.config().max_name_len)?;
    let mut dir = Inode::load_dir(&*txn, parent).await?;
    dir.check_modify_dir(ctx)?;
    let entry = load_entry(&*txn, parent, name).await?;
    if !entry.is_dir() {
        return make_error_msg(MetaCode::NOT_DIRECTORY, String::from_utf8_lossy(name).into_owned());
    }
    let inode = Inode::load(&*txn, entry.inode).await?;
    if let Some(inode) = &inode {
        if dir.sticky_denies(ctx, inode) {
            return make_error_msg(MetaCode::NOT_PERMITTED, "sticky directory");
        }
    }
    if !DirEntry::check_empty(&*txn, entry.inode).await? {
        return make_error_msg(MetaCode::NOT_EMPTY, String::from_utf8_lossy(name).into_owned());
    }

    let now = store.now();
    entry.remove(txn).await?;
    dir.attr.nlink = dir.attr.nlink.saturating_sub(1);
    dir.attr.touch_mtime(now);
    dir.store(txn).await?;
    if let Some(inode) = inode {
        delete_inode(txn, store, out, &inode).await?;
    }
    tracing::debug!(parent, name = %String::from_utf8_lossy(name), ino = entry.inode, "rmdir: removed directory");
    Ok(())
}

async fn load_entry(
    txn: &dyn ReadWriteTransaction,
    parent: Ino,
    name: &[u8],
) -> Result<DirEntry> {
    DirEntry::load(txn, parent, name).await?.ok_or_else(|| {
        Status::with_message(MetaCode::NOT_FOUND, String::from_utf8_lossy(name).into_owned())
    })
}

/// Handles an inode whose link count just reached zero. An inode still open
/// through this engine is kept with a sustained record until its last close;
/// otherwise it is deleted now.
pub(crate) async fn release_inode(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    out: &mut PostCommit,
    inode: Inode,
) -> Result<()> {
    if inode.is_file() && store.is_open(inode.id) {
        inode.store(txn).await?;
        txn.set(&reclaim::pack_sustained_key(store.sid(), inode.id), &[])
            .await?;
        tracing::debug!(ino = inode.id, "unlink: inode kept open");
        return Ok(());
    }
    delete_inode(txn, store, out, &inode).await
}

/// Removes the inode record and everything hanging off it. File content is
/// left for the reclaimer, announced through `out`.
pub(crate) async fn delete_inode(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    out: &mut PostCommit,
    inode: &Inode,
) -> Result<()> {
    inode.remove(txn).await?;
    xattr::remove_all(txn, inode.id).await?;
    flock::remove_all(txn, inode.id).await?;
    plock::remove_all(txn, inode.id).await?;
    out.wake.push(inode.id);
    if inode.is_file() {
        reclaim::mark_deleted(txn, inode.id, inode.attr.length).await?;
        out.reclaim.push(inode.id);
    }
    store.update_stats(txn, -space_of(&inode.attr), -1).await?;
    tracing::debug!(ino = inode.id, typ = ?inode.attr.typ, "delete: inode removed");
    Ok(())
}
