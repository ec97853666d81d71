//! Attribute updates (chmod, chown, utimens, size).

use slicefs_kv::ReadWriteTransaction;
use slicefs_types::{make_error_msg, MetaCode, Result};

use crate::context::Context;
use crate::inode::Inode;
use crate::meta_store::{MetaStore, PostCommit};
use crate::ops::truncate;
use crate::types::{
    Attr, Ino, CLEAR_SUGID_ON_CHMOD, CLEAR_SUGID_ON_CHOWN, MODE_MASK_W, SET_ATTR_ATIME,
    SET_ATTR_ATIME_NOW, SET_ATTR_CTIME, SET_ATTR_GID, SET_ATTR_MODE, SET_ATTR_MTIME,
    SET_ATTR_MTIME_NOW, SET_ATTR_SIZE, SET_ATTR_UID, S_ISGID, S_ISUID,
};

#[allow(clippy::too_many_arguments)]
pub async fn set_attr(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    ctx: &Context,
    out: &mut PostCommit,
    ino: Ino,
    set: u16,
    sgid_clear_mode: u8,
    attr: &Attr,
) -> Result<Attr> {
    if set & SET_ATTR_SIZE != 0 {
        truncate::truncate(txn, store, ctx, out, ino, 0, attr.length).await?;
    }
    let mut inode = Inode::load_existing(&*txn, ino).await?;
    let now = store.now();
    let mut cur = inode.attr.clone();

    if set & SET_ATTR_UID != 0 && attr.uid != cur.uid {
        if !ctx.is_root() {
            return make_error_msg(MetaCode::NOT_PERMITTED, "only root may change the owner");
        }
        cur.uid = attr.uid;
    }
    if set & SET_ATTR_GID != 0 && attr.gid != cur.gid {
        if !ctx.is_root() && !(ctx.uid == cur.uid && ctx.in_group(attr.gid)) {
            return make_error_msg(
                MetaCode::NOT_PERMITTED,
                format!("cannot change group to {}", attr.gid),
            );
        }
        cur.gid = attr.gid;
    }
    if set & (SET_ATTR_UID | SET_ATTR_GID) != 0
        && inode.is_file()
        && (!ctx.is_root() || sgid_clear_mode & CLEAR_SUGID_ON_CHOWN != 0)
    {
        cur.mode &= !(S_ISUID | S_ISGID);
    }

    if set & SET_ATTR_MODE != 0 {
        if !inode.is_owner(ctx) {
            return make_error_msg(MetaCode::NOT_PERMITTED, "only the owner may change the mode");
        }
        let mut mode = attr.mode & 0o7777;
        let outsider = !ctx.is_root() && !ctx.in_group(cur.gid);
        if !inode.is_dir() && (outsider || sgid_clear_mode & CLEAR_SUGID_ON_CHMOD != 0) {
            mode &= !S_ISGID;
        }
        cur.mode = mode;
    }

    for (explicit, now_bit, is_atime) in [
        (SET_ATTR_ATIME, SET_ATTR_ATIME_NOW, true),
        (SET_ATTR_MTIME, SET_ATTR_MTIME_NOW, false),
    ] {
        if set & (explicit | now_bit) == 0 {
            continue;
        }
        if set & now_bit != 0 {
            if !inode.is_owner(ctx) {
                inode.check_access(ctx, MODE_MASK_W)?;
            }
        } else if !inode.is_owner(ctx) {
            return make_error_msg(MetaCode::NOT_PERMITTED, "only the owner may set times");
        }
        match (is_atime, set & now_bit != 0) {
            (true, true) => cur.touch_atime(now),
            (true, false) => {
                cur.atime = attr.atime;
                cur.atimensec = attr.atimensec;
            }
            (false, true) => {
                cur.mtime = now.sec;
                cur.mtimensec = now.nsec;
            }
            (false, false) => {
                cur.mtime = attr.mtime;
                cur.mtimensec = attr.mtimensec;
            }
        }
    }

    cur.touch_ctime(now);
    if set & SET_ATTR_CTIME != 0 && inode.is_owner(ctx) {
        cur.ctime = attr.ctime;
        cur.ctimensec = attr.ctimensec;
    }
    inode.attr = cur;
    inode.store(txn).await?;
    tracing::debug!(ino, set, mode = inode.attr.mode, uid = inode.attr.uid, gid = inode.attr.gid, "set_attr: updated");
    Ok(inode.attr)
}
