//! BSD `flock` records: `[FLOCK_PREFIX][ino BE][owner BE] -> {ltype, sid}`.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use slicefs_kv::{prefix_range, ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::{make_error_msg, LockOwner, Result, SessionId, Status, StatusCode};

use crate::inode::Inode;
use crate::key_prefix;
use crate::meta_store::{MetaStore, PostCommit};
use crate::types::{Ino, F_RDLCK, F_UNLCK, F_WRLCK};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlockRecord {
    pub ltype: u32,
    pub sid: SessionId,
}

pub fn pack_prefix(ino: Ino) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.put_u8(key_prefix::FLOCK_PREFIX);
    key.put_u64(ino);
    key
}

pub fn pack_key(ino: Ino, owner: LockOwner) -> Vec<u8> {
    let mut key = pack_prefix(ino);
    key.put_u64(owner.get());
    key
}

fn unpack(key: &[u8], value: &[u8]) -> Result<(LockOwner, FlockRecord)> {
    if key.len() != 17 || key[0] != key_prefix::FLOCK_PREFIX {
        return make_error_msg(StatusCode::DATA_CORRUPTION, "invalid flock key format");
    }
    let owner = LockOwner((&key[9..]).get_u64());
    let record = serde_json::from_slice(value).map_err(|e| {
        Status::with_message(
            StatusCode::DATA_CORRUPTION,
            format!("failed to deserialize flock of {:?}: {}", owner, e),
        )
    })?;
    Ok((owner, record))
}

/// All flock holders of `ino`. The scan joins the read set.
pub async fn load_all<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    ino: Ino,
) -> Result<Vec<(LockOwner, FlockRecord)>> {
    let (begin, end) = prefix_range(&pack_prefix(ino));
    let result = txn.get_range(&begin, &end, 0).await?;
    result.kvs.iter().map(|kv| unpack(&kv.key, &kv.value)).collect()
}

/// Whether another owner's `held` lock prevents `owner` from taking `ltype`.
pub fn conflicts(ltype: u32, held: &[(LockOwner, FlockRecord)], owner: LockOwner) -> bool {
    held.iter().any(|(o, r)| {
        *o != owner && (ltype == F_WRLCK || r.ltype == F_WRLCK)
    })
}

/// One attempt to apply `ltype` for `owner`. Returns false on conflict,
/// leaving the store untouched.
pub async fn try_flock(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    out: &mut PostCommit,
    ino: Ino,
    owner: LockOwner,
    ltype: u32,
) -> Result<bool> {
    if !matches!(ltype, F_UNLCK | F_RDLCK | F_WRLCK) {
        return make_error_msg(StatusCode::INVALID_ARG, format!("flock type {}", ltype));
    }
    Inode::load_existing(&*txn, ino).await?;
    let key = pack_key(ino, owner);

    if ltype == F_UNLCK {
        if txn.get(&key).await?.is_some() {
            txn.clear(&key).await?;
            out.wake.push(ino);
        }
        tracing::debug!(ino, ?owner, "flock: released");
        return Ok(true);
    }

    let held = load_all(&*txn, ino).await?;
    if conflicts(ltype, &held, owner) {
        return Ok(false);
    }
    let mine = held.iter().find(|(o, _)| *o == owner).map(|(_, r)| r.ltype);
    if mine != Some(ltype) {
        let record = FlockRecord {
            ltype,
            sid: store.sid(),
        };
        let value = serde_json::to_vec(&record).map_err(|e| {
            Status::with_message(StatusCode::DATA_CORRUPTION, format!("flock: {}", e))
        })?;
        txn.set(&key, &value).await?;
        if mine == Some(F_WRLCK) {
            // Downgrade lets shared waiters in.
            out.wake.push(ino);
        }
    }
    tracing::debug!(ino, ?owner, ltype, "flock: granted");
    Ok(true)
}

/// Drops every flock record of `ino`.
pub async fn remove_all(txn: &mut dyn ReadWriteTransaction, ino: Ino) -> Result<()> {
    let (begin, end) = prefix_range(&pack_prefix(ino));
    txn.clear_range(&begin.key, &end.key).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(entries: &[(u64, u32)]) -> Vec<(LockOwner, FlockRecord)> {
        entries
            .iter()
            .map(|&(o, ltype)| {
                (
                    LockOwner(o),
                    FlockRecord {
                        ltype,
                        sid: SessionId(1),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_conflict_matrix() {
        let shared = held(&[(1, F_RDLCK)]);
        assert!(!conflicts(F_RDLCK, &shared, LockOwner(2)));
        assert!(conflicts(F_WRLCK, &shared, LockOwner(2)));
        assert!(!conflicts(F_WRLCK, &shared, LockOwner(1)));

        let exclusive = held(&[(1, F_WRLCK)]);
        assert!(conflicts(F_RDLCK, &exclusive, LockOwner(2)));
        assert!(!conflicts(F_RDLCK, &exclusive, LockOwner(1)));
    }

    #[test]
    fn test_record_json() {
        let key = pack_key(7, LockOwner(9));
        let value = serde_json::to_vec(&FlockRecord {
            ltype: F_WRLCK,
            sid: SessionId(4),
        })
        .unwrap();
        let (owner, record) = unpack(&key, &value).unwrap();
        assert_eq!(owner, LockOwner(9));
        assert_eq!(record.ltype, F_WRLCK);
        assert_eq!(record.sid, SessionId(4));
    }
}
