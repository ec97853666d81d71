//! Reads and writes of chunk slice histories.

use slicefs_kv::{ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::{make_error_msg, MetaCode, Result, StatusCode};

use crate::chunk::{self, SliceRecord};
use crate::event::Message;
use crate::inode::Inode;
use crate::meta_store::{space_of, MetaStore, PostCommit};
use crate::types::{Ino, Slice, CHUNK_SIZE};

/// Announces `(ino, indx)` for compaction when its history just reached
/// `compact_threshold` entries, and again at every further multiple.
pub(crate) fn maybe_compact(store: &MetaStore, out: &mut PostCommit, ino: Ino, indx: u32, count: usize) {
    let threshold = store.config().compact_threshold.max(1);
    if count >= threshold && (count - threshold) % threshold == 0 {
        out.messages.push(Message::CompactChunk { inode: ino, indx });
    }
}

/// Flattened content of chunk `indx` of `ino`.
pub async fn read<T: ReadOnlyTransaction + ?Sized>(txn: &T, ino: Ino, indx: u32) -> Result<Vec<Slice>> {
    let inode = Inode::snapshot_load(txn, ino).await?;
    match inode {
        Some(inode) if inode.is_file() => {}
        Some(_) => return make_error_msg(StatusCode::INVALID_ARG, format!("inode {} is not a regular file", ino)),
        None => return make_error_msg(MetaCode::NOT_FOUND, format!("inode {}", ino)),
    }
    let records = chunk::snapshot_load(txn, ino, indx).await?;
    Ok(chunk::build_read_plan(&records))
}

/// Raw history of chunk `indx` of `ino`, in the order it was recorded.
pub async fn read_history<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    ino: Ino,
    indx: u32,
) -> Result<Vec<SliceRecord>> {
    chunk::snapshot_load(txn, ino, indx).await
}

fn check_slice(pos: u32, slice: &Slice) -> Result<()> {
    if slice.len == 0 {
        return make_error_msg(StatusCode::INVALID_ARG, "empty slice");
    }
    if u64::from(pos) + u64::from(slice.len) > CHUNK_SIZE {
        return make_error_msg(
            StatusCode::INVALID_ARG,
            format!("slice [{}, +{}) crosses the chunk end", pos, slice.len),
        );
    }
    if u64::from(slice.off) + u64::from(slice.len) > u64::from(slice.clen) {
        return make_error_msg(
            StatusCode::INVALID_ARG,
            format!("slice [{}, +{}) outside content of {} bytes", slice.off, slice.len, slice.clen),
        );
    }
    Ok(())
}

/// Records `slice` at `pos` of chunk `indx` and extends the file over it.
pub async fn write(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    out: &mut PostCommit,
    ino: Ino,
    indx: u32,
    pos: u32,
    slice: Slice,
) -> Result<()> {
    check_slice(pos, &slice)?;
    let mut inode = Inode::load_existing(&*txn, ino).await?;
    if inode.is_dir() {
        return make_error_msg(MetaCode::IS_DIRECTORY, format!("inode {}", ino));
    }
    if !inode.is_file() {
        return make_error_msg(StatusCode::INVALID_ARG, format!("inode {} is not a regular file", ino));
    }

    let end = u64::from(indx) * CHUNK_SIZE + u64::from(pos) + u64::from(slice.len);
    let old_space = space_of(&inode.attr);
    if end > inode.attr.length {
        inode.attr.length = end;
    }
    let delta = space_of(&inode.attr) - old_space;
    if delta > 0 {
        store.check_quota(&*txn, delta, 0).await?;
    }

    let count = chunk::append(txn, ino, indx, SliceRecord::new(pos, slice)).await?;
    inode.attr.touch_mtime(store.now());
    inode.store(txn).await?;
    store.update_stats(txn, delta, 0).await?;
    maybe_compact(store, out, ino, indx, count);

    tracing::debug!(ino, indx, pos, chunkid = slice.chunkid, len = slice.len, history = count, "write: slice recorded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetaConfig;

    #[test]
    fn test_slice_bounds() {
        assert!(check_slice(0, &Slice::new(1, 10, 0, 10)).is_ok());
        assert!(check_slice((CHUNK_SIZE - 10) as u32, &Slice::new(1, 10, 0, 10)).is_ok());
        assert!(check_slice((CHUNK_SIZE - 9) as u32, &Slice::new(1, 10, 0, 10)).is_err());
        assert!(check_slice(0, &Slice::new(1, 10, 5, 6)).is_err());
        assert!(check_slice(0, &Slice::new(1, 10, 0, 0)).is_err());
    }

    #[test]
    fn test_compaction_cadence() {
        let store = MetaStore::new(MetaConfig {
            compact_threshold: 3,
            ..Default::default()
        });
        let mut out = PostCommit::default();
        for count in 1..=9 {
            maybe_compact(&store, &mut out, 5, 0, count);
        }
        assert_eq!(out.messages.len(), 3);
        assert!(out.messages.iter().all(|m| *m == Message::CompactChunk { inode: 5, indx: 0 }));
    }
}
