//! Name resolution and attribute reads.

use slicefs_kv::ReadOnlyTransaction;
use slicefs_types::{make_error_msg, MetaCode, Result, Status, StatusCode};

use crate::context::Context;
use crate::dir_entry::DirEntry;
use crate::inode::Inode;
use crate::meta_store::MetaStore;
use crate::types::{Attr, Ino, InodeType, MODE_MASK_X};

pub async fn lookup<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    store: &MetaStore,
    ctx: &Context,
    parent: Ino,
    name: &[u8],
) -> Result<(Ino, Attr)> {
    let dir = Inode::load_dir(txn, parent).await?;
    dir.check_access(ctx, MODE_MASK_X)?;
    match name {
        b"." => return Ok((dir.id, dir.attr)),
        b".." => {
            let up = Inode::load_existing(txn, dir.parent).await?;
            return Ok((up.id, up.attr));
        }
        _ => {}
    }
    if name.len() > store.config().max_name_len {
        return make_error_msg(MetaCode::NAME_TOO_LONG, format!("name of {} bytes", name.len()));
    }
    let entry = DirEntry::load(txn, parent, name).await?.ok_or_else(|| {
        Status::with_message(
            MetaCode::NOT_FOUND,
            String::from_utf8_lossy(name).into_owned(),
        )
    })?;
    let inode = Inode::load_existing(txn, entry.inode).await?;
    Ok((inode.id, inode.attr))
}

pub async fn get_attr<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino) -> Result<Attr> {
    Ok(Inode::load_existing(txn, ino).await?.attr)
}

pub async fn access<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    ctx: &Context,
    ino: Ino,
    mask: u8,
) -> Result<()> {
    Inode::load_existing(txn, ino).await?.check_access(ctx, mask)
}

pub async fn read_link<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino) -> Result<Vec<u8>> {
    let inode = Inode::load_existing(txn, ino).await?;
    if inode.attr.typ != InodeType::Symlink {
        return make_error_msg(StatusCode::INVALID_ARG, format!("inode {} is not a symlink", ino));
    }
    inode.target.ok_or_else(|| {
        Status::with_message(MetaCode::INCONSISTENT, format!("symlink {} has no target", ino))
    })
}
