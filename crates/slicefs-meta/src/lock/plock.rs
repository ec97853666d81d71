//! POSIX byte-range locks.
//!
//! Each `(ino, owner)` keeps a sorted list of non-overlapping half-open
//! ranges: `[PLOCK_PREFIX][ino BE][owner BE] -> [PlockRecord]`. An `end` of
//! `u64::MAX` extends to end of file.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use slicefs_kv::{prefix_range, ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::{make_error_msg, LockOwner, MetaCode, Result, Status, StatusCode};

use crate::inode::Inode;
use crate::key_prefix;
use crate::meta_store::PostCommit;
use crate::types::{Ino, LockInfo, F_RDLCK, F_UNLCK, F_WRLCK};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlockRecord {
    pub ltype: u32,
    pub start: u64,
    pub end: u64,
    pub pid: u32,
}

impl PlockRecord {
    pub fn new(ltype: u32, start: u64, end: u64, pid: u32) -> Self {
        Self {
            ltype,
            start,
            end,
            pid,
        }
    }

    fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start < end && start < self.end
    }
}

pub fn pack_prefix(ino: Ino) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.put_u8(key_prefix::PLOCK_PREFIX);
    key.put_u64(ino);
    key
}

pub fn pack_key(ino: Ino, owner: LockOwner) -> Vec<u8> {
    let mut key = pack_prefix(ino);
    key.put_u64(owner.get());
    key
}

fn unpack(key: &[u8], value: &[u8]) -> Result<(LockOwner, Vec<PlockRecord>)> {
    if key.len() != 17 || key[0] != key_prefix::PLOCK_PREFIX {
        return make_error_msg(StatusCode::DATA_CORRUPTION, "invalid plock key format");
    }
    let owner = LockOwner((&key[9..]).get_u64());
    let records = serde_json::from_slice(value).map_err(|e| {
        Status::with_message(
            StatusCode::DATA_CORRUPTION,
            format!("failed to deserialize plocks of {:?}: {}", owner, e),
        )
    })?;
    Ok((owner, records))
}

fn pack_value(records: &[PlockRecord]) -> Result<Vec<u8>> {
    serde_json::to_vec(records).map_err(|e| {
        Status::with_message(StatusCode::DATA_CORRUPTION, format!("plock: {}", e))
    })
}

pub fn check_range(start: u64, end: u64) -> Result<()> {
    if start >= end {
        return make_error_msg(
            StatusCode::INVALID_ARG,
            format!("lock range [{}, {})", start, end),
        );
    }
    Ok(())
}

/// Records of every owner of `ino`. With `conflict` set the scan joins the
/// read set.
pub async fn load_all<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    ino: Ino,
    conflict: bool,
) -> Result<Vec<(LockOwner, Vec<PlockRecord>)>> {
    let (begin, end) = prefix_range(&pack_prefix(ino));
    let result = if conflict {
        txn.get_range(&begin, &end, 0).await?
    } else {
        txn.snapshot_get_range(&begin, &end, 0).await?
    };
    result.kvs.iter().map(|kv| unpack(&kv.key, &kv.value)).collect()
}

/// First lock of another owner incompatible with `ltype` over `[start, end)`.
pub fn find_conflict(
    all: &[(LockOwner, Vec<PlockRecord>)],
    owner: LockOwner,
    ltype: u32,
    start: u64,
    end: u64,
) -> Option<PlockRecord> {
    all.iter()
        .filter(|(o, _)| *o != owner)
        .flat_map(|(_, records)| records.iter())
        .find(|r| r.overlaps(start, end) && (ltype == F_WRLCK || r.ltype == F_WRLCK))
        .copied()
}

/// Applies `new` to one owner's sorted records: the range is replaced by
/// `new` (or cut out for `F_UNLCK`) and adjacent equal-type neighbours
/// merge.
pub fn update_locks(existing: &[PlockRecord], new: PlockRecord) -> Vec<PlockRecord> {
    let mut out = Vec::with_capacity(existing.len() + 2);
    for r in existing {
        if !r.overlaps(new.start, new.end) {
            out.push(*r);
            continue;
        }
        if r.start < new.start {
            out.push(PlockRecord { end: new.start, ..*r });
        }
        if r.end > new.end {
            out.push(PlockRecord { start: new.end, ..*r });
        }
    }
    if new.ltype != F_UNLCK {
        out.push(new);
    }
    out.sort_by_key(|r| r.start);

    let mut merged: Vec<PlockRecord> = Vec::with_capacity(out.len());
    for r in out {
        match merged.last_mut() {
            Some(last) if last.end == r.start && last.ltype == r.ltype => last.end = r.end,
            _ => merged.push(r),
        }
    }
    merged
}

pub async fn getlk<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    ino: Ino,
    owner: LockOwner,
    ltype: u32,
    start: u64,
    end: u64,
) -> Result<LockInfo> {
    if !matches!(ltype, F_RDLCK | F_WRLCK) {
        return make_error_msg(StatusCode::INVALID_ARG, format!("getlk type {}", ltype));
    }
    check_range(start, end)?;
    if Inode::snapshot_load(txn, ino).await?.is_none() {
        return make_error_msg(MetaCode::NOT_FOUND, format!("inode {}", ino));
    }
    let all = load_all(txn, ino, false).await?;
    Ok(match find_conflict(&all, owner, ltype, start, end) {
        Some(r) => LockInfo {
            ltype: r.ltype,
            start: r.start,
            end: r.end,
            pid: r.pid,
        },
        None => LockInfo::unlocked(),
    })
}

/// One attempt at `setlk`. Returns false on conflict, leaving the store
/// untouched.
#[allow(clippy::too_many_arguments)]
pub async fn try_setlk(
    txn: &mut dyn ReadWriteTransaction,
    out: &mut PostCommit,
    ino: Ino,
    owner: LockOwner,
    ltype: u32,
    start: u64,
    end: u64,
    pid: u32,
) -> Result<bool> {
    if !matches!(ltype, F_UNLCK | F_RDLCK | F_WRLCK) {
        return make_error_msg(StatusCode::INVALID_ARG, format!("setlk type {}", ltype));
    }
    check_range(start, end)?;
    Inode::load_existing(&*txn, ino).await?;

    let all = load_all(&*txn, ino, true).await?;
    if ltype != F_UNLCK && find_conflict(&all, owner, ltype, start, end).is_some() {
        return Ok(false);
    }
    let mine = all
        .iter()
        .find(|(o, _)| *o == owner)
        .map(|(_, r)| r.as_slice())
        .unwrap_or_default();
    let updated = update_locks(mine, PlockRecord::new(ltype, start, end, pid));
    if updated.as_slice() == mine {
        return Ok(true);
    }

    let key = pack_key(ino, owner);
    if updated.is_empty() {
        txn.clear(&key).await?;
    } else {
        txn.set(&key, &pack_value(&updated)?).await?;
    }
    // Unlocks and downgrades may unblock others.
    if ltype != F_WRLCK {
        out.wake.push(ino);
    }
    tracing::debug!(ino, ?owner, ltype, start, end, "plock: updated");
    Ok(true)
}

pub async fn remove_all(txn: &mut dyn ReadWriteTransaction, ino: Ino) -> Result<()> {
    let (begin, end) = prefix_range(&pack_prefix(ino));
    txn.clear_range(&begin.key, &end.key).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(ltype: u32, start: u64, end: u64) -> PlockRecord {
        PlockRecord::new(ltype, start, end, 10)
    }

    #[test]
    fn test_unlock_splits() {
        let locks = update_locks(&[rec(F_WRLCK, 0, 100)], rec(F_UNLCK, 40, 60));
        assert_eq!(locks, vec![rec(F_WRLCK, 0, 40), rec(F_WRLCK, 60, 100)]);
    }

    #[test]
    fn test_replace_changes_type_in_range() {
        let locks = update_locks(&[rec(F_RDLCK, 0, 100)], rec(F_WRLCK, 20, 30));
        assert_eq!(
            locks,
            vec![rec(F_RDLCK, 0, 20), rec(F_WRLCK, 20, 30), rec(F_RDLCK, 30, 100)]
        );
    }

    #[test]
    fn test_adjacent_same_type_merge() {
        let locks = update_locks(&[rec(F_RDLCK, 0, 10), rec(F_RDLCK, 20, 30)], rec(F_RDLCK, 10, 20));
        assert_eq!(locks, vec![rec(F_RDLCK, 0, 30)]);
        let locks = update_locks(&[rec(F_RDLCK, 0, 10)], rec(F_WRLCK, 10, 20));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_unlock_everything() {
        let locks = update_locks(&[rec(F_RDLCK, 5, 10)], rec(F_UNLCK, 0, u64::MAX));
        assert!(locks.is_empty());
    }

    #[test]
    fn test_conflicts_ignore_own_records() {
        let all = vec![
            (LockOwner(1), vec![rec(F_WRLCK, 0, 100)]),
            (LockOwner(2), vec![rec(F_RDLCK, 200, 300)]),
        ];
        assert!(find_conflict(&all, LockOwner(1), F_WRLCK, 0, 50).is_none());
        assert_eq!(find_conflict(&all, LockOwner(3), F_RDLCK, 50, 60), Some(rec(F_WRLCK, 0, 100)));
        assert!(find_conflict(&all, LockOwner(3), F_RDLCK, 100, 250).is_none());
        assert!(find_conflict(&all, LockOwner(3), F_WRLCK, 100, 250).is_some());
    }

    #[test]
    fn test_range_check() {
        assert!(check_range(0, 1).is_ok());
        assert_eq!(check_range(5, 5).unwrap_err().code(), StatusCode::INVALID_ARG);
    }
}
