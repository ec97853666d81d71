//! rename, including `RENAME_NOREPLACE` and `RENAME_EXCHANGE`.

use std::collections::HashSet;

use slicefs_kv::ReadWriteTransaction;
use slicefs_types::{make_error_msg, MetaCode, Result, Status, StatusCode};

use crate::context::Context;
use crate::dir_entry::{is_dot_or_dotdot, validate_name, DirEntry};
use crate::inode::Inode;
use crate::meta_store::{MetaStore, PostCommit};
use crate::ops::remove::{delete_inode, release_inode};
use crate::types::{
    Attr, Ino, RENAME_EXCHANGE, RENAME_NOREPLACE, RENAME_WHITEOUT, ROOT_INODE,
};

#[derive(Debug, Clone, Copy)]
pub struct RenameArgs<'a> {
    pub src_parent: Ino,
    pub src_name: &'a [u8],
    pub dst_parent: Ino,
    pub dst_name: &'a [u8],
    pub flags: u32,
}

fn check_flags(flags: u32) -> Result<()> {
    if flags & RENAME_WHITEOUT != 0 {
        return make_error_msg(MetaCode::NOT_SUPPORTED, "RENAME_WHITEOUT");
    }
    if flags & !(RENAME_NOREPLACE | RENAME_EXCHANGE) != 0 {
        return make_error_msg(StatusCode::INVALID_ARG, format!("rename flags {:#x}", flags));
    }
    if flags & RENAME_NOREPLACE != 0 && flags & RENAME_EXCHANGE != 0 {
        return make_error_msg(
            StatusCode::INVALID_ARG,
            "RENAME_NOREPLACE and RENAME_EXCHANGE are exclusive",
        );
    }
    Ok(())
}

fn check_name(store: &MetaStore, name: &[u8]) -> Result<()> {
    if is_dot_or_dotdot(name) {
        return make_error_msg(StatusCode::INVALID_ARG, "cannot rename a dot entry");
    }
    validate_name(name, store.config().max_name_len)
}

/// Fails when `dir` is `ancestor` or lies below it. Every inode on the way
/// up joins the read set, so a concurrent move of an ancestor conflicts.
async fn check_not_under(txn: &dyn ReadWriteTransaction, dir: Ino, ancestor: Ino) -> Result<()> {
    let mut seen = HashSet::new();
    let mut cur = dir;
    loop {
        if cur == ancestor {
            return make_error_msg(
                StatusCode::INVALID_ARG,
                format!("cannot move directory {} under itself", ancestor),
            );
        }
        if cur == ROOT_INODE {
            return Ok(());
        }
        if !seen.insert(cur) {
            return make_error_msg(MetaCode::BAD_FILE_SYSTEM, format!("directory loop at {}", cur));
        }
        cur = Inode::load_existing(txn, cur).await?.parent;
    }
}

/// The destination parent, which may be the source parent itself.
fn dst_dir<'a>(src: &'a mut Inode, dst: &'a mut Option<Inode>) -> &'a mut Inode {
    match dst {
        Some(d) => d,
        None => src,
    }
}

pub async fn rename(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    ctx: &Context,
    out: &mut PostCommit,
    args: &RenameArgs<'_>,
) -> Result<(Ino, Attr)> {
    check_flags(args.flags)?;
    check_name(store, args.src_name)?;
    check_name(store, args.dst_name)?;

    let mut sp = Inode::load_dir(&*txn, args.src_parent).await?;
    sp.check_modify_dir(ctx)?;
    let same_parent = args.src_parent == args.dst_parent;
    let mut dp = if same_parent {
        None
    } else {
        let dp = Inode::load_dir(&*txn, args.dst_parent).await?;
        dp.check_modify_dir(ctx)?;
        Some(dp)
    };

    let se = DirEntry::load(&*txn, args.src_parent, args.src_name)
        .await?
        .ok_or_else(|| {
            Status::with_message(
                MetaCode::NOT_FOUND,
                String::from_utf8_lossy(args.src_name).into_owned(),
            )
        })?;
    let mut sino = Inode::load_existing(&*txn, se.inode).await?;
    if sp.sticky_denies(ctx, &sino) {
        return make_error_msg(MetaCode::NOT_PERMITTED, "sticky source directory");
    }

    let de = DirEntry::load(&*txn, args.dst_parent, args.dst_name).await?;
    if let Some(de) = &de {
        if de.inode == se.inode {
            return Ok((sino.id, sino.attr));
        }
    }
    let exchange = args.flags & RENAME_EXCHANGE != 0;
    let mut dino = match &de {
        Some(de) => {
            if args.flags & RENAME_NOREPLACE != 0 {
                return make_error_msg(
                    MetaCode::EXISTS,
                    String::from_utf8_lossy(args.dst_name).into_owned(),
                );
            }
            let dino = Inode::load_existing(&*txn, de.inode).await?;
            if dst_dir(&mut sp, &mut dp).sticky_denies(ctx, &dino) {
                return make_error_msg(MetaCode::NOT_PERMITTED, "sticky destination directory");
            }
            if !exchange {
                match (sino.is_dir(), dino.is_dir()) {
                    (true, false) => {
                        return make_error_msg(MetaCode::NOT_DIRECTORY, "destination is not a directory")
                    }
                    (false, true) => {
                        return make_error_msg(MetaCode::IS_DIRECTORY, "destination is a directory")
                    }
                    (true, true) => {
                        if !DirEntry::check_empty(&*txn, dino.id).await? {
                            return make_error_msg(
                                MetaCode::NOT_EMPTY,
                                String::from_utf8_lossy(args.dst_name).into_owned(),
                            );
                        }
                    }
                    (false, false) => {}
                }
            }
            Some(dino)
        }
        None if exchange => {
            return make_error_msg(
                MetaCode::NOT_FOUND,
                String::from_utf8_lossy(args.dst_name).into_owned(),
            )
        }
        None => None,
    };

    if !same_parent {
        if sino.is_dir() {
            check_not_under(&*txn, args.dst_parent, sino.id).await?;
        }
        if let Some(dino) = dino.as_ref().filter(|d| exchange && d.is_dir()) {
            check_not_under(&*txn, args.src_parent, dino.id).await?;
        }
    }

    let now = store.now();
    if exchange {
        let Some(mut other) = dino.take() else {
            return make_error_msg(MetaCode::FOUND_BUG, "exchange without destination");
        };
        DirEntry::new(args.src_parent, args.src_name, other.id, other.attr.typ)
            .store(txn)
            .await?;
        DirEntry::new(args.dst_parent, args.dst_name, sino.id, sino.attr.typ)
            .store(txn)
            .await?;
        if let Some(d) = dp.as_mut() {
            if sino.is_dir() {
                sp.attr.nlink = sp.attr.nlink.saturating_sub(1);
                d.attr.nlink += 1;
                sino.parent = args.dst_parent;
            }
            if other.is_dir() {
                d.attr.nlink = d.attr.nlink.saturating_sub(1);
                sp.attr.nlink += 1;
                other.parent = args.src_parent;
            }
        }
        other.attr.touch_ctime(now);
        other.store(txn).await?;
    } else {
        se.remove(txn).await?;
        DirEntry::new(args.dst_parent, args.dst_name, sino.id, sino.attr.typ)
            .store(txn)
            .await?;
        if let Some(mut replaced) = dino.take() {
            replaced.attr.touch_ctime(now);
            if replaced.is_dir() {
                let d = dst_dir(&mut sp, &mut dp);
                d.attr.nlink = d.attr.nlink.saturating_sub(1);
                delete_inode(txn, store, out, &replaced).await?;
            } else {
                replaced.attr.nlink = replaced.attr.nlink.saturating_sub(1);
                if replaced.attr.nlink > 0 {
                    replaced.store(txn).await?;
                } else {
                    release_inode(txn, store, out, replaced).await?;
                }
            }
        }
        if sino.is_dir() && !same_parent {
            let d = dst_dir(&mut sp, &mut dp);
            if d.attr.nlink >= store.config().max_nlink {
                return make_error_msg(
                    MetaCode::TOO_MANY_LINKS,
                    format!("directory {} has {} links", d.id, d.attr.nlink),
                );
            }
            d.attr.nlink += 1;
            sp.attr.nlink = sp.attr.nlink.saturating_sub(1);
            sino.parent = args.dst_parent;
        }
    }

    sino.attr.touch_ctime(now);
    sino.store(txn).await?;
    sp.attr.touch_mtime(now);
    sp.store(txn).await?;
    if let Some(mut d) = dp {
        d.attr.touch_mtime(now);
        d.store(txn).await?;
    }

    tracing::debug!(
        src_parent = args.src_parent,
        src_name = %String::from_utf8_lossy(args.src_name),
        dst_parent = args.dst_parent,
        dst_name = %String::from_utf8_lossy(args.dst_name),
        ino = sino.id,
        exchange,
        "rename: moved entry"
    );
    Ok((sino.id, sino.attr))
}
