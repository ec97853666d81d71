//! Extended attribute records: `[XATTR_PREFIX][ino BE][name] -> value`.

use bytes::BufMut;
use slicefs_kv::{prefix_list_end_key, KeySelector, ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::{make_error_msg, MetaCode, Result, StatusCode};

use crate::key_prefix;
use crate::types::{Ino, MAX_XATTR_NAME, MAX_XATTR_VALUE};

pub fn pack_prefix(ino: Ino) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.put_u8(key_prefix::XATTR_PREFIX);
    key.put_u64(ino);
    key
}

pub fn pack_key(ino: Ino, name: &[u8]) -> Vec<u8> {
    let mut key = pack_prefix(ino);
    key.extend_from_slice(name);
    key
}

pub fn validate(name: &[u8], value: Option<&[u8]>) -> Result<()> {
    if name.is_empty() || name.len() > MAX_XATTR_NAME {
        return make_error_msg(
            StatusCode::INVALID_ARG,
            format!("xattr name of {} bytes", name.len()),
        );
    }
    if let Some(value) = value {
        if value.len() > MAX_XATTR_VALUE {
            return make_error_msg(
                MetaCode::TOO_BIG,
                format!("xattr value of {} bytes", value.len()),
            );
        }
    }
    Ok(())
}

/// Names of all attributes of `ino`, in byte order.
pub async fn list_names<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino) -> Result<Vec<Vec<u8>>> {
    let prefix = pack_prefix(ino);
    let begin = KeySelector::new(prefix.clone(), true);
    let end = KeySelector::new(prefix_list_end_key(&prefix), false);
    let result = txn.snapshot_get_range(&begin, &end, 0).await?;
    Ok(result
        .kvs
        .into_iter()
        .map(|kv| kv.key[prefix.len()..].to_vec())
        .collect())
}

/// NUL-terminated concatenation of `names`, the `listxattr(2)` format.
pub fn join_names(names: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(names.iter().map(|n| n.len() + 1).sum());
    for name in names {
        out.extend_from_slice(name);
        out.push(0);
    }
    out
}

pub async fn remove_all(txn: &mut dyn ReadWriteTransaction, ino: Ino) -> Result<()> {
    let prefix = pack_prefix(ino);
    txn.clear_range(&prefix, &prefix_list_end_key(&prefix)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_names() {
        let names = vec![b"user.a".to_vec(), b"user.bb".to_vec()];
        assert_eq!(join_names(&names), b"user.a\0user.bb\0".to_vec());
        assert!(join_names(&[]).is_empty());
    }

    #[test]
    fn test_validate() {
        assert!(validate(b"user.k", Some(b"v")).is_ok());
        assert_eq!(validate(b"", None).unwrap_err().code(), StatusCode::INVALID_ARG);
        let big = vec![0u8; MAX_XATTR_VALUE + 1];
        assert_eq!(validate(b"user.k", Some(&big)).unwrap_err().code(), MetaCode::TOO_BIG);
    }
}
