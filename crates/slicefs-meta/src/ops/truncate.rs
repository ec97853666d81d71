//! truncate and fallocate.
//!
//! Content is never rewritten in place: ranges that must read as zeroes get
//! a hole record appended to their chunk histories, and chunks wholly past
//! the end are dropped with their content announced for deletion.

use slicefs_kv::ReadWriteTransaction;
use slicefs_types::{make_error_msg, MetaCode, Result, StatusCode};

use crate::chunk::{self, SliceRecord};
use crate::context::Context;
use crate::event::Message;
use crate::inode::Inode;
use crate::meta_store::{space_of, MetaStore, PostCommit};
use crate::ops::chunk_ops::maybe_compact;
use crate::types::{
    chunk_index, Attr, Ino, Slice, CHUNK_MASK, CHUNK_SIZE, FALLOC_COLLAPSE_RANGE,
    FALLOC_INSERT_RANGE, FALLOC_KEEP_SIZE, FALLOC_NO_HIDE_STALE, FALLOC_PUNCH_HOLE,
    FALLOC_ZERO_RANGE, MODE_MASK_W, TRUNCATE_SKIP_PERM_CHECK,
};

/// Largest file length representable by chunk indexes.
const MAX_FILE_LENGTH: u64 = (u32::MAX as u64 + 1) * CHUNK_SIZE;

async fn load_file(
    txn: &mut dyn ReadWriteTransaction,
    ctx: &Context,
    ino: Ino,
    check_perm: bool,
) -> Result<Inode> {
    let inode = Inode::load_existing(&*txn, ino).await?;
    if inode.is_dir() {
        return make_error_msg(MetaCode::IS_DIRECTORY, format!("inode {}", ino));
    }
    if !inode.is_file() {
        return make_error_msg(StatusCode::INVALID_ARG, format!("inode {} is not a regular file", ino));
    }
    if check_perm {
        inode.check_access(ctx, MODE_MASK_W)?;
    }
    Ok(inode)
}

/// Stores `inode` with its new `length`, charging the space difference.
async fn commit_length(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    inode: &mut Inode,
    length: u64,
) -> Result<()> {
    let old_space = space_of(&inode.attr);
    inode.attr.length = length;
    let delta = space_of(&inode.attr) - old_space;
    if delta > 0 {
        store.check_quota(&*txn, delta, 0).await?;
    }
    inode.attr.touch_mtime(store.now());
    inode.store(txn).await?;
    store.update_stats(txn, delta, 0).await
}

/// Appends hole records over `[start, end)` to every chunk that has a
/// history. Chunks without one already read as zeroes.
async fn write_holes(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    out: &mut PostCommit,
    ino: Ino,
    start: u64,
    end: u64,
) -> Result<()> {
    let mut off = start;
    while off < end {
        let indx = chunk_index(off);
        let pos = off & CHUNK_MASK;
        let len = (CHUNK_SIZE - pos).min(end - off);
        if !chunk::load(&*txn, ino, indx).await?.is_empty() {
            let record = SliceRecord::new(pos as u32, Slice::hole(len as u32));
            let count = chunk::append(txn, ino, indx, record).await?;
            maybe_compact(store, out, ino, indx, count);
        }
        off += len;
    }
    Ok(())
}

/// Drops the histories of chunks `from..to` and announces their content.
async fn drop_chunks(
    txn: &mut dyn ReadWriteTransaction,
    out: &mut PostCommit,
    ino: Ino,
    from: u32,
    to: Option<u32>,
) -> Result<usize> {
    let (chunks, _) = chunk::list(&*txn, ino, from, 0).await?;
    let mut dropped = 0;
    for (indx, records) in chunks {
        if to.is_some_and(|to| indx >= to) {
            break;
        }
        for (chunkid, clen) in chunk::content_ids(&records) {
            out.messages.push(Message::DeleteSlice { chunkid, clen });
        }
        chunk::remove(txn, ino, indx).await?;
        dropped += 1;
    }
    Ok(dropped)
}

/// Zeroes `[new_len, old_len)` and drops the chunks past the new end.
async fn shrink_content(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    out: &mut PostCommit,
    ino: Ino,
    new_len: u64,
    old_len: u64,
) -> Result<()> {
    let pos = new_len & CHUNK_MASK;
    let mut first_dead = chunk_index(new_len);
    if pos > 0 {
        let chunk_end = (new_len - pos + CHUNK_SIZE).min(old_len);
        write_holes(txn, store, out, ino, new_len, chunk_end).await?;
        first_dead += 1;
    }
    let dropped = drop_chunks(txn, out, ino, first_dead, None).await?;
    tracing::debug!(ino, first_dead, dropped, "truncate: dropped chunks");
    Ok(())
}

pub async fn truncate(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    ctx: &Context,
    out: &mut PostCommit,
    ino: Ino,
    flags: u8,
    length: u64,
) -> Result<Attr> {
    if length > MAX_FILE_LENGTH {
        return make_error_msg(MetaCode::FILE_TOO_LARGE, format!("length {}", length));
    }
    let mut inode = load_file(txn, ctx, ino, flags & TRUNCATE_SKIP_PERM_CHECK == 0).await?;
    let old_len = inode.attr.length;
    if length < old_len {
        shrink_content(txn, store, out, ino, length, old_len).await?;
    }
    commit_length(txn, store, &mut inode, length).await?;
    tracing::debug!(ino, old_len, length, "truncate: done");
    Ok(inode.attr)
}

fn check_falloc_mode(mode: u8) -> Result<()> {
    if mode & FALLOC_NO_HIDE_STALE != 0 {
        return make_error_msg(MetaCode::NOT_SUPPORTED, "FALLOC_FL_NO_HIDE_STALE");
    }
    if mode & FALLOC_PUNCH_HOLE != 0 && mode & FALLOC_KEEP_SIZE == 0 {
        return make_error_msg(StatusCode::INVALID_ARG, "PUNCH_HOLE requires KEEP_SIZE");
    }
    if mode & (FALLOC_COLLAPSE_RANGE | FALLOC_INSERT_RANGE) != 0
        && mode != FALLOC_COLLAPSE_RANGE
        && mode != FALLOC_INSERT_RANGE
    {
        return make_error_msg(
            StatusCode::INVALID_ARG,
            "COLLAPSE_RANGE and INSERT_RANGE must be used alone",
        );
    }
    Ok(())
}

fn check_chunk_aligned(off: u64, size: u64) -> Result<()> {
    if off & CHUNK_MASK != 0 || size & CHUNK_MASK != 0 {
        return make_error_msg(
            StatusCode::INVALID_ARG,
            format!("range [{}, +{}) is not chunk aligned", off, size),
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn fallocate(
    txn: &mut dyn ReadWriteTransaction,
    store: &MetaStore,
    ctx: &Context,
    out: &mut PostCommit,
    ino: Ino,
    mode: u8,
    off: u64,
    size: u64,
) -> Result<Attr> {
    if size == 0 {
        return make_error_msg(StatusCode::INVALID_ARG, "fallocate of zero bytes");
    }
    check_falloc_mode(mode)?;
    let end = match off.checked_add(size) {
        Some(end) if end <= MAX_FILE_LENGTH => end,
        _ => return make_error_msg(MetaCode::FILE_TOO_LARGE, format!("range [{}, +{})", off, size)),
    };
    let mut inode = load_file(txn, ctx, ino, true).await?;
    let length = inode.attr.length;
    let keep_size = mode & FALLOC_KEEP_SIZE != 0;

    let new_len = match mode & !FALLOC_KEEP_SIZE {
        0 => {
            if keep_size { length } else { length.max(end) }
        }
        FALLOC_PUNCH_HOLE | FALLOC_ZERO_RANGE => {
            write_holes(txn, store, out, ino, off, end.min(length)).await?;
            if keep_size { length } else { length.max(end) }
        }
        FALLOC_COLLAPSE_RANGE => {
            check_chunk_aligned(off, size)?;
            if end >= length {
                return make_error_msg(StatusCode::INVALID_ARG, "collapse reaches end of file");
            }
            let (first, n) = (chunk_index(off), chunk_index(size));
            drop_chunks(txn, out, ino, first, Some(first + n)).await?;
            let (moved, _) = chunk::list(&*txn, ino, first + n, 0).await?;
            for (indx, records) in moved {
                chunk::remove(txn, ino, indx).await?;
                chunk::store(txn, ino, indx - n, &records).await?;
            }
            length - size
        }
        FALLOC_INSERT_RANGE => {
            check_chunk_aligned(off, size)?;
            if off >= length {
                return make_error_msg(StatusCode::INVALID_ARG, "insert at or past end of file");
            }
            if length + size > MAX_FILE_LENGTH {
                return make_error_msg(MetaCode::FILE_TOO_LARGE, "insert beyond maximum length");
            }
            let (first, n) = (chunk_index(off), chunk_index(size));
            let (moved, _) = chunk::list(&*txn, ino, first, 0).await?;
            for (indx, records) in moved.into_iter().rev() {
                chunk::remove(txn, ino, indx).await?;
                chunk::store(txn, ino, indx + n, &records).await?;
            }
            length + size
        }
        other => {
            return make_error_msg(MetaCode::NOT_SUPPORTED, format!("fallocate mode {:#x}", other))
        }
    };
    commit_length(txn, store, &mut inode, new_len).await?;
    tracing::debug!(ino, mode, off, size, length = new_len, "fallocate: done");
    Ok(inode.attr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_falloc_mode_rules() {
        assert!(check_falloc_mode(0).is_ok());
        assert!(check_falloc_mode(FALLOC_KEEP_SIZE).is_ok());
        assert!(check_falloc_mode(FALLOC_PUNCH_HOLE | FALLOC_KEEP_SIZE).is_ok());
        assert!(check_falloc_mode(FALLOC_ZERO_RANGE).is_ok());
        assert_eq!(
            check_falloc_mode(FALLOC_PUNCH_HOLE).unwrap_err().code(),
            StatusCode::INVALID_ARG
        );
        assert_eq!(
            check_falloc_mode(FALLOC_COLLAPSE_RANGE | FALLOC_KEEP_SIZE).unwrap_err().code(),
            StatusCode::INVALID_ARG
        );
        assert_eq!(
            check_falloc_mode(FALLOC_NO_HIDE_STALE).unwrap_err().code(),
            MetaCode::NOT_SUPPORTED
        );
    }

    #[test]
    fn test_alignment() {
        assert!(check_chunk_aligned(CHUNK_SIZE, 2 * CHUNK_SIZE).is_ok());
        assert!(check_chunk_aligned(1, CHUNK_SIZE).is_err());
    }
}
