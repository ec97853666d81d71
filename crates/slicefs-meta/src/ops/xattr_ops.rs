//! Extended attribute operations.

use slicefs_kv::{ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::{make_error_msg, MetaCode, Result, Status, StatusCode};

use crate::context::Context;
use crate::inode::Inode;
use crate::meta_store::MetaStore;
use crate::types::{Ino, MODE_MASK_W, XATTR_CREATE, XATTR_REPLACE};
use crate::xattr;

fn no_attr(name: &[u8]) -> Status {
    Status::with_message(MetaCode::NO_ATTR, String::from_utf8_lossy(name).into_owned())
}

fn check_writer(inode: &Inode, ctx: &Context) -> Result<()> {
    if inode.is_owner(ctx) {
        return Ok(());
    }
    inode.check_access(ctx, MODE_MASK_W)
}

pub async fn get_xattr<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    ino: Ino,
    name: &[u8],
) -> Result<Vec<u8>> {
    xattr::validate(name, None)?;
    Inode::load_existing(txn, ino).await?;
    txn.snapshot_get(&xattr::pack_key(ino, name))
        .await?
        .ok_or_else(|| no_attr(name))
}

/// NUL-terminated names of all attributes of `ino`.
pub async fn list_xattr<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino) -> Result<Vec<u8>> {
    Inode::load_existing(txn, ino).await?;
    let names = xattr::list_names(txn, ino).await?;
    Ok(xattr::join_names(&names))
}

#[allow(clippy::too_many_arguments)]
pub async fn set_xattr(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    ctx: &Context,
    ino: Ino,
    name: &[u8],
    value: &[u8],
    flags: u32,
) -> Result<()> {
    xattr::validate(name, Some(value))?;
    if flags & !(XATTR_CREATE | XATTR_REPLACE) != 0 || flags == XATTR_CREATE | XATTR_REPLACE {
        return make_error_msg(StatusCode::INVALID_ARG, format!("xattr flags {:#x}", flags));
    }
    let mut inode = Inode::load_existing(&*txn, ino).await?;
    check_writer(&inode, ctx)?;
    let key = xattr::pack_key(ino, name);
    let exists = txn.get(&key).await?.is_some();
    if flags & XATTR_CREATE != 0 && exists {
        return make_error_msg(MetaCode::EXISTS, String::from_utf8_lossy(name).into_owned());
    }
    if flags & XATTR_REPLACE != 0 && !exists {
        return Err(no_attr(name));
    }
    txn.set(&key, value).await?;
    inode.attr.touch_ctime(store.now());
    inode.store(txn).await?;
    tracing::debug!(ino, name = %String::from_utf8_lossy(name), len = value.len(), "xattr: set");
    Ok(())
}

pub async fn remove_xattr(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    ctx: &Context,
    ino: Ino,
    name: &[u8],
) -> Result<()> {
    xattr::validate(name, None)?;
    let mut inode = Inode::load_existing(&*txn, ino).await?;
    check_writer(&inode, ctx)?;
    let key = xattr::pack_key(ino, name);
    if txn.get(&key).await?.is_none() {
        return Err(no_attr(name));
    }
    txn.clear(&key).await?;
    inode.attr.touch_ctime(store.now());
    inode.store(txn).await?;
    tracing::debug!(ino, name = %String::from_utf8_lossy(name), "xattr: removed");
    Ok(())
}
