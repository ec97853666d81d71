//! Creation of new names: mknod, mkdir, create, symlink and link.
//!
//! The existence check, the inode and entry writes, the parent update and
//! the counters all happen in one transaction. Two racing creators both
//! read the entry key, so only one of them commits; the other retries and
//! sees `Exists`.

use slicefs_kv::ReadWriteTransaction;
use slicefs_types::{make_error_msg, MetaCode, Result, StatusCode};

use crate::context::Context;
use crate::dir_entry::DirEntry;
use crate::inode::Inode;
use crate::meta_store::{space_of, MetaStore};
use crate::ops::check_new_name;
use crate::types::{Attr, Ino, InodeType, BLOCK_SIZE, MAX_SYMLINK_LEN, S_ISGID};

#[derive(Debug, Clone)]
pub struct CreateArgs<'a> {
    pub parent: Ino,
    pub name: &'a [u8],
    pub typ: InodeType,
    pub mode: u16,
    pub cumask: u16,
    pub rdev: u32,
    /// Symlink target.
    pub target: Option<&'a [u8]>,
    /// New directories inherit the parent's setgid bit.
    pub copysgid: bool,
}

impl<'a> CreateArgs<'a> {
    pub fn new(parent: Ino, name: &'a [u8], typ: InodeType, mode: u16) -> Self {
        Self {
            parent,
            name,
            typ,
            mode,
            cumask: 0,
            rdev: 0,
            target: None,
            copysgid: false,
        }
    }
}

/// Creates inode `id` under `args.parent`.
pub async fn mknod(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    ctx: &Context,
    id: Ino,
    args: &CreateArgs<'_>,
) -> Result<(Ino, Attr)> {
    check_new_name(store, args.name)?;
    if args.typ == InodeType::Symlink {
        match args.target {
            Some(t) if t.is_empty() => {
                return make_error_msg(StatusCode::INVALID_ARG, "empty symlink target")
            }
            Some(t) if t.len() > MAX_SYMLINK_LEN => {
                return make_error_msg(MetaCode::NAME_TOO_LONG, "symlink target too long")
            }
            Some(_) => {}
            None => return make_error_msg(StatusCode::INVALID_ARG, "symlink without target"),
        }
    }

    let mut parent = Inode::load_dir(&*txn, args.parent).await?;
    parent.check_modify_dir(ctx)?;
    if DirEntry::load(&*txn, args.parent, args.name).await?.is_some() {
        return make_error_msg(
            MetaCode::EXISTS,
            String::from_utf8_lossy(args.name).into_owned(),
        );
    }
    let is_dir = args.typ == InodeType::Directory;
    if is_dir && parent.attr.nlink >= store.config().max_nlink {
        return make_error_msg(
            MetaCode::TOO_MANY_LINKS,
            format!("directory {} has {} links", parent.id, parent.attr.nlink),
        );
    }

    let now = store.now();
    let mut attr = Attr {
        typ: args.typ,
        mode: args.mode & !args.cumask & 0o7777,
        uid: ctx.uid,
        gid: ctx.gid,
        nlink: if is_dir { 2 } else { 1 },
        length: match args.typ {
            InodeType::Directory => BLOCK_SIZE,
            InodeType::Symlink => args.target.map_or(0, |t| t.len() as u64),
            _ => 0,
        },
        rdev: args.rdev,
        full: true,
        ..Default::default()
    };
    attr.touch_atime(now);
    attr.touch_mtime(now);
    if parent.attr.mode & S_ISGID != 0 {
        attr.gid = parent.attr.gid;
        if is_dir {
            if args.copysgid {
                attr.mode |= S_ISGID;
            }
        } else if attr.mode & 0o2010 == 0o2010 && !ctx.is_root() && !ctx.in_group(attr.gid) {
            attr.mode &= !S_ISGID;
        }
    }

    let space = space_of(&attr);
    store.check_quota(&*txn, space, 1).await?;

    let mut inode = Inode::new(id, attr, args.parent);
    inode.target = args.target.map(<[u8]>::to_vec);
    inode.store(txn).await?;
    DirEntry::new(args.parent, args.name, id, args.typ)
        .store(txn)
        .await?;

    if is_dir {
        parent.attr.nlink += 1;
    }
    parent.attr.touch_mtime(now);
    parent.store(txn).await?;
    store.update_stats(txn, space, 1).await?;

    tracing::debug!(
        parent = args.parent,
        name = %String::from_utf8_lossy(args.name),
        ino = id,
        typ = ?args.typ,
        "create: created entry"
    );
    Ok((id, inode.attr))
}

/// Adds `name` under `parent` for the existing non-directory `ino`.
pub async fn link(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    ctx: &Context,
    ino: Ino,
    parent: Ino,
    name: &[u8],
) -> Result<Attr> {
    check_new_name(store, name)?;
    let mut dir = Inode::load_dir(&*txn, parent).await?;
    dir.check_modify_dir(ctx)?;
    let mut inode = Inode::load_existing(&*txn, ino).await?;
    if inode.is_dir() {
        return make_error_msg(MetaCode::IS_DIRECTORY, format!("cannot link directory {}", ino));
    }
    if inode.attr.nlink == 0 {
        return make_error_msg(MetaCode::NOT_FOUND, format!("inode {} was unlinked", ino));
    }
    if inode.attr.nlink >= store.config().max_nlink {
        return make_error_msg(
            MetaCode::TOO_MANY_LINKS,
            format!("inode {} has {} links", ino, inode.attr.nlink),
        );
    }
    if DirEntry::load(&*txn, parent, name).await?.is_some() {
        return make_error_msg(MetaCode::EXISTS, String::from_utf8_lossy(name).into_owned());
    }

    let now = store.now();
    DirEntry::new(parent, name, ino, inode.attr.typ)
        .store(txn)
        .await?;
    inode.attr.nlink += 1;
    inode.attr.touch_ctime(now);
    inode.store(txn).await?;
    dir.attr.touch_mtime(now);
    dir.store(txn).await?;

    tracing::debug!(ino, parent, nlink = inode.attr.nlink, "link: added name");
    Ok(inode.attr)
}
