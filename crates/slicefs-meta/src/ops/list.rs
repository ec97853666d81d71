//! Directory listing.

use slicefs_kv::ReadOnlyTransaction;
use slicefs_types::Result;

use crate::context::Context;
use crate::dir_entry::DirEntry;
use crate::inode::Inode;
use crate::types::{Attr, Entry, Ino, InodeType, MODE_MASK_R};

/// One page of the entries of directory `ino`.
///
/// The first page (`after == None`) starts with `.` and `..`, which do not
/// count against `limit`. Later pages resume after the stored name `after`.
/// `limit == 0` lists everything. Returns the entries and whether stored
/// entries remain.
pub async fn readdir_page<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    ctx: &Context,
    ino: Ino,
    after: Option<&[u8]>,
    limit: usize,
    want_attr: bool,
) -> Result<(Vec<Entry>, bool)> {
    let dir = Inode::load_dir(txn, ino).await?;
    dir.check_access(ctx, MODE_MASK_R)?;

    let mut entries = Vec::new();
    if after.is_none() {
        let parent_attr = if dir.parent == dir.id {
            dir.attr.clone()
        } else {
            match Inode::snapshot_load(txn, dir.parent).await? {
                Some(parent) => parent.attr,
                None => Attr::type_only(InodeType::Directory),
            }
        };
        entries.push(Entry {
            inode: dir.id,
            name: b".".to_vec(),
            attr: dir.attr.clone(),
        });
        entries.push(Entry {
            inode: dir.parent,
            name: b"..".to_vec(),
            attr: parent_attr,
        });
    }

    let (stored, more) = DirEntry::list(txn, ino, after, limit).await?;
    for e in stored {
        let attr = if want_attr {
            match Inode::snapshot_load(txn, e.inode).await? {
                Some(inode) => inode.attr,
                None => {
                    tracing::warn!(parent = ino, ino = e.inode, "readdir: entry without inode");
                    Attr::type_only(e.typ)
                }
            }
        } else {
            Attr::type_only(e.typ)
        };
        entries.push(Entry {
            inode: e.inode,
            name: e.name,
            attr,
        });
    }
    Ok((entries, more))
}
