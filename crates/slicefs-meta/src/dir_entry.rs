//! Directory entries: `(parent, name) -> (inode, type)`.
//!
//! Entries of one directory share the key prefix `[DIR_ENTRY_PREFIX][parent]`
//! and therefore list in byte order of their names. `.` and `..` are never
//! stored.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use slicefs_kv::{
    key_after, prefix_list_end_key, KeySelector, ReadOnlyTransaction, ReadWriteTransaction,
};
use slicefs_types::{make_error_msg, MetaCode, Result, Status, StatusCode};

use crate::key_prefix;
use crate::types::{Ino, InodeType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub parent: Ino,
    pub name: Vec<u8>,
    pub inode: Ino,
    pub typ: InodeType,
}

#[derive(Serialize, Deserialize)]
struct DirEntryValue {
    inode: Ino,
    typ: InodeType,
}

/// Rejects names that can never be stored as an entry.
pub fn validate_name(name: &[u8], max_len: usize) -> Result<()> {
    if name.is_empty() {
        return make_error_msg(StatusCode::INVALID_ARG, "empty name");
    }
    if name.len() > max_len {
        return make_error_msg(
            MetaCode::NAME_TOO_LONG,
            format!("name of {} bytes", name.len()),
        );
    }
    if name.iter().any(|&b| b == b'/' || b == 0) {
        return make_error_msg(StatusCode::INVALID_ARG, "name contains '/' or NUL");
    }
    Ok(())
}

pub fn is_dot_or_dotdot(name: &[u8]) -> bool {
    name == b"." || name == b".."
}

impl DirEntry {
    pub fn new(parent: Ino, name: impl Into<Vec<u8>>, inode: Ino, typ: InodeType) -> Self {
        Self {
            parent,
            name: name.into(),
            inode,
            typ,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.typ == InodeType::Directory
    }

    pub fn pack_key(&self) -> Vec<u8> {
        Self::pack_key_for(self.parent, &self.name)
    }

    /// `[DIR_ENTRY_PREFIX][parent BE][name]`
    pub fn pack_key_for(parent: Ino, name: &[u8]) -> Vec<u8> {
        let mut key = Self::pack_prefix(parent);
        key.extend_from_slice(name);
        key
    }

    pub fn pack_prefix(parent: Ino) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(9);
        prefix.put_u8(key_prefix::DIR_ENTRY_PREFIX);
        prefix.put_u64(parent);
        prefix
    }

    fn pack_value(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&DirEntryValue {
            inode: self.inode,
            typ: self.typ,
        })
        .map_err(|e| {
            Status::with_message(
                StatusCode::DATA_CORRUPTION,
                format!("failed to serialize dir entry: {}", e),
            )
        })
    }

    pub fn unpack(key: &[u8], value: &[u8]) -> Result<Self> {
        if key.len() < 10 || key[0] != key_prefix::DIR_ENTRY_PREFIX {
            return make_error_msg(StatusCode::DATA_CORRUPTION, "invalid dir entry key format");
        }
        let parent = (&key[1..9]).get_u64();
        let data: DirEntryValue = serde_json::from_slice(value).map_err(|e| {
            Status::with_message(
                StatusCode::DATA_CORRUPTION,
                format!("failed to deserialize dir entry under {}: {}", parent, e),
            )
        })?;
        Ok(Self {
            parent,
            name: key[9..].to_vec(),
            inode: data.inode,
            typ: data.typ,
        })
    }

    pub async fn load<T: ReadOnlyTransaction + ?Sized>(
        txn: &T,
        parent: Ino,
        name: &[u8],
    ) -> Result<Option<Self>> {
        let key = Self::pack_key_for(parent, name);
        match txn.get(&key).await? {
            Some(v) => Ok(Some(Self::unpack(&key, &v)?)),
            None => Ok(None),
        }
    }

    pub async fn store(&self, txn: &mut dyn ReadWriteTransaction) -> Result<()> {
        let value = self.pack_value()?;
        txn.set(&self.pack_key(), &value).await
    }

    pub async fn remove(&self, txn: &mut dyn ReadWriteTransaction) -> Result<()> {
        txn.clear(&self.pack_key()).await
    }

    /// Lists up to `limit` entries of `parent` whose names sort after `after`.
    /// Returns the entries and whether more remain. `limit == 0` lists all.
    pub async fn list<T: ReadOnlyTransaction + ?Sized>(
        txn: &T,
        parent: Ino,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<(Vec<Self>, bool)> {
        let prefix = Self::pack_prefix(parent);
        let begin = match after {
            Some(name) => KeySelector::new(Self::pack_key_for(parent, name), false),
            None => KeySelector::new(prefix.clone(), true),
        };
        let end = KeySelector::new(prefix_list_end_key(&prefix), false);
        let limit = i32::try_from(limit).unwrap_or(i32::MAX);
        let result = txn.snapshot_get_range(&begin, &end, limit).await?;
        let entries = result
            .kvs
            .iter()
            .map(|kv| Self::unpack(&kv.key, &kv.value))
            .collect::<Result<Vec<_>>>()?;
        Ok((entries, result.has_more))
    }

    /// Whether `parent` has no entries. The scan joins the read set, so a
    /// concurrent insert into the directory conflicts with the caller.
    pub async fn check_empty<T: ReadOnlyTransaction + ?Sized>(txn: &T, parent: Ino) -> Result<bool> {
        let prefix = Self::pack_prefix(parent);
        let begin = KeySelector::new(key_after(&prefix), true);
        let end = KeySelector::new(prefix_list_end_key(&prefix), false);
        let result = txn.get_range(&begin, &end, 1).await?;
        Ok(result.kvs.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slicefs_kv::KvEngine;
    use slicefs_kv_backends::MemDbEngine;

    #[test]
    fn test_validate_name() {
        assert!(validate_name(b"hello.txt", 255).is_ok());
        assert_eq!(validate_name(b"", 255).unwrap_err().code(), StatusCode::INVALID_ARG);
        assert_eq!(validate_name(b"a/b", 255).unwrap_err().code(), StatusCode::INVALID_ARG);
        assert_eq!(validate_name(b"a\0", 255).unwrap_err().code(), StatusCode::INVALID_ARG);
        assert_eq!(
            validate_name(&[b'x'; 256], 255).unwrap_err().code(),
            MetaCode::NAME_TOO_LONG
        );
    }

    #[test]
    fn test_pack_unpack_binary_name() {
        let entry = DirEntry::new(7, vec![0xff, b'a', 0x80], 9, InodeType::Fifo);
        let back = DirEntry::unpack(&entry.pack_key(), &entry.pack_value().unwrap()).unwrap();
        assert_eq!(back, entry);
    }

    #[tokio::test]
    async fn test_list_pages_in_name_order() {
        let engine = MemDbEngine::new();
        let mut txn = engine.create_readwrite_transaction();
        for (i, name) in [&b"c"[..], b"a", b"b", b"d"].iter().enumerate() {
            DirEntry::new(5, name.to_vec(), 100 + i as u64, InodeType::File)
                .store(&mut txn)
                .await
                .unwrap();
        }
        DirEntry::new(6, b"other".to_vec(), 200, InodeType::File)
            .store(&mut txn)
            .await
            .unwrap();
        txn.commit().await.unwrap();

        let ro = engine.create_readonly_transaction();
        let (page, more) = DirEntry::list(&ro, 5, None, 2).await.unwrap();
        assert!(more);
        assert_eq!(page.iter().map(|e| e.name.clone()).collect::<Vec<_>>(), vec![b"a".to_vec(), b"b".to_vec()]);
        let (rest, more) = DirEntry::list(&ro, 5, Some(b"b"), 0).await.unwrap();
        assert!(!more);
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].name, b"c");

        assert!(!DirEntry::check_empty(&ro, 5).await.unwrap());
        assert!(DirEntry::check_empty(&ro, 99).await.unwrap());
    }
}
