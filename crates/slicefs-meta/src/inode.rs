//! Inode records and permission checks.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use slicefs_kv::{ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::{make_error, make_error_msg, MetaCode, Result, Status, StatusCode};

use crate::context::Context;
use crate::key_prefix;
use crate::types::{Attr, Ino, InodeType, Timespec, MODE_MASK_W, MODE_MASK_X, ROOT_INODE, S_ISVTX};

/// Stored form of an inode.
///
/// `parent` is meaningful for directories only; it resolves `..` and lets
/// rename refuse to move a directory under itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    #[serde(skip)]
    pub id: Ino,
    pub attr: Attr,
    pub parent: Ino,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Vec<u8>>,
}

impl Inode {
    pub fn new(id: Ino, attr: Attr, parent: Ino) -> Self {
        Self {
            id,
            attr,
            parent,
            target: None,
        }
    }

    pub fn root(now: Timespec) -> Self {
        let mut attr = Attr {
            typ: InodeType::Directory,
            mode: 0o777,
            nlink: 2,
            length: crate::types::BLOCK_SIZE,
            full: true,
            ..Default::default()
        };
        attr.touch_atime(now);
        attr.touch_mtime(now);
        Self::new(ROOT_INODE, attr, ROOT_INODE)
    }

    pub fn is_dir(&self) -> bool {
        self.attr.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.attr.is_file()
    }

    pub fn pack_key(&self) -> Vec<u8> {
        Self::pack_key_for(self.id)
    }

    /// `[INODE_PREFIX][ino BE]`
    pub fn pack_key_for(id: Ino) -> Vec<u8> {
        let mut key = Vec::with_capacity(9);
        key.put_u8(key_prefix::INODE_PREFIX);
        key.put_u64(id);
        key
    }

    pub fn pack_value(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            Status::with_message(
                StatusCode::DATA_CORRUPTION,
                format!("failed to serialize inode {}: {}", self.id, e),
            )
        })
    }

    pub fn unpack(key: &[u8], value: &[u8]) -> Result<Self> {
        if key.len() != 9 || key[0] != key_prefix::INODE_PREFIX {
            return make_error_msg(StatusCode::DATA_CORRUPTION, "invalid inode key format");
        }
        let id = (&key[1..]).get_u64();
        let mut inode: Inode = serde_json::from_slice(value).map_err(|e| {
            Status::with_message(
                StatusCode::DATA_CORRUPTION,
                format!("failed to deserialize inode {}: {}", id, e),
            )
        })?;
        inode.id = id;
        inode.attr.full = true;
        Ok(inode)
    }

    /// Read without registering a read conflict.
    pub async fn snapshot_load<T: ReadOnlyTransaction + ?Sized>(
        txn: &T,
        id: Ino,
    ) -> Result<Option<Self>> {
        let key = Self::pack_key_for(id);
        match txn.snapshot_get(&key).await? {
            Some(v) => Ok(Some(Self::unpack(&key, &v)?)),
            None => Ok(None),
        }
    }

    pub async fn load<T: ReadOnlyTransaction + ?Sized>(txn: &T, id: Ino) -> Result<Option<Self>> {
        let key = Self::pack_key_for(id);
        match txn.get(&key).await? {
            Some(v) => Ok(Some(Self::unpack(&key, &v)?)),
            None => Ok(None),
        }
    }

    /// Like [`Inode::load`], but a missing inode is `NotFound`.
    pub async fn load_existing<T: ReadOnlyTransaction + ?Sized>(txn: &T, id: Ino) -> Result<Self> {
        Self::load(txn, id)
            .await?
            .ok_or_else(|| Status::with_message(MetaCode::NOT_FOUND, format!("inode {}", id)))
    }

    /// Loads `id` and requires it to be a directory.
    pub async fn load_dir<T: ReadOnlyTransaction + ?Sized>(txn: &T, id: Ino) -> Result<Self> {
        let inode = Self::load_existing(txn, id).await?;
        if !inode.is_dir() {
            return make_error_msg(MetaCode::NOT_DIRECTORY, format!("inode {}", id));
        }
        Ok(inode)
    }

    pub async fn store(&self, txn: &mut dyn ReadWriteTransaction) -> Result<()> {
        if self.id == ROOT_INODE && !self.is_dir() {
            return make_error_msg(MetaCode::FOUND_BUG, "root inode must be a directory");
        }
        let value = self.pack_value()?;
        txn.set(&self.pack_key(), &value).await
    }

    pub async fn remove(&self, txn: &mut dyn ReadWriteTransaction) -> Result<()> {
        if self.id == ROOT_INODE {
            return make_error_msg(MetaCode::FOUND_BUG, "cannot remove the root inode");
        }
        txn.clear(&self.pack_key()).await
    }

    /// Permission bits that apply to the caller.
    fn granted(&self, ctx: &Context) -> u8 {
        let mode = self.attr.mode;
        let bits = if ctx.uid == self.attr.uid {
            mode >> 6
        } else if ctx.in_group(self.attr.gid) {
            mode >> 3
        } else {
            mode
        };
        (bits & 0o7) as u8
    }

    /// Checks `mask` (`MODE_MASK_*` bits) against the caller.
    ///
    /// Root passes read and write unconditionally; it needs at least one
    /// execute bit to execute a non-directory.
    pub fn check_access(&self, ctx: &Context, mask: u8) -> Result<()> {
        if ctx.is_root() {
            if mask & MODE_MASK_X != 0 && !self.is_dir() && self.attr.mode & 0o111 == 0 {
                return make_error(MetaCode::NO_PERMISSION);
            }
            return Ok(());
        }
        if self.granted(ctx) & mask != mask {
            return make_error_msg(
                MetaCode::NO_PERMISSION,
                format!("inode {} mask {:o}", self.id, mask),
            );
        }
        Ok(())
    }

    /// Permission to add or remove entries in this directory.
    pub fn check_modify_dir(&self, ctx: &Context) -> Result<()> {
        self.check_access(ctx, MODE_MASK_W | MODE_MASK_X)
    }

    /// Whether the sticky bit on this directory forbids `ctx` from removing
    /// or renaming `child`.
    pub fn sticky_denies(&self, ctx: &Context, child: &Inode) -> bool {
        self.attr.mode & S_ISVTX != 0
            && !ctx.is_root()
            && ctx.uid != self.attr.uid
            && ctx.uid != child.attr.uid
    }

    pub fn is_owner(&self, ctx: &Context) -> bool {
        ctx.is_root() || ctx.uid == self.attr.uid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MODE_MASK_R;

    fn file(mode: u16, uid: u32, gid: u32) -> Inode {
        Inode::new(
            42,
            Attr {
                typ: InodeType::File,
                mode,
                uid,
                gid,
                nlink: 1,
                full: true,
                ..Default::default()
            },
            0,
        )
    }

    #[test]
    fn test_key_is_big_endian() {
        let key = Inode::pack_key_for(0x0102);
        assert_eq!(key, vec![key_prefix::INODE_PREFIX, 0, 0, 0, 0, 0, 0, 1, 2]);
        assert!(Inode::pack_key_for(255) < Inode::pack_key_for(256));
    }

    #[test]
    fn test_pack_unpack() {
        let mut inode = file(0o640, 1000, 100);
        inode.target = Some(b"/etc/hosts".to_vec());
        let back = Inode::unpack(&inode.pack_key(), &inode.pack_value().unwrap()).unwrap();
        assert_eq!(back, inode);
    }

    #[test]
    fn test_unpack_rejects_bad_key() {
        let err = Inode::unpack(b"\x02short", b"{}").unwrap_err();
        assert_eq!(err.code(), StatusCode::DATA_CORRUPTION);
    }

    #[test]
    fn test_owner_group_other() {
        let inode = file(0o640, 1000, 100);
        assert!(inode.check_access(&Context::new(1000, 1), MODE_MASK_R | MODE_MASK_W).is_ok());
        assert!(inode.check_access(&Context::new(2000, 100), MODE_MASK_R).is_ok());
        assert!(inode.check_access(&Context::new(2000, 100), MODE_MASK_W).is_err());
        let supplementary = Context::new(3000, 1).with_gids(vec![100]);
        assert!(inode.check_access(&supplementary, MODE_MASK_R).is_ok());
        let err = inode.check_access(&Context::new(3000, 1), MODE_MASK_R).unwrap_err();
        assert_eq!(err.code(), MetaCode::NO_PERMISSION);
    }

    #[test]
    fn test_root_execute_needs_a_bit() {
        let inode = file(0o600, 1000, 100);
        let root = Context::root();
        assert!(inode.check_access(&root, MODE_MASK_R | MODE_MASK_W).is_ok());
        assert!(inode.check_access(&root, MODE_MASK_X).is_err());
        assert!(file(0o610, 1000, 100).check_access(&root, MODE_MASK_X).is_ok());
    }

    #[test]
    fn test_sticky() {
        let mut dir = Inode::root(Timespec::now());
        dir.attr.mode = 0o1777;
        let child = file(0o644, 1000, 100);
        assert!(!dir.sticky_denies(&Context::new(1000, 100), &child));
        assert!(dir.sticky_denies(&Context::new(1001, 100), &child));
        assert!(!dir.sticky_denies(&Context::root(), &child));
    }
}
