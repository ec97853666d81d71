//! Chunk slice histories.
//!
//! A chunk's value is the concatenation of fixed 24-byte records in the order
//! they were written:
//!
//! ```text
//! pos: u32 | chunkid: u64 | clen: u32 | off: u32 | len: u32   (big-endian)
//! ```
//!
//! The history is append-only; later records cover earlier ones where they
//! overlap. Readers flatten it with [`build_read_plan`].

use bytes::{Buf, BufMut};
use slicefs_kv::{prefix_list_end_key, KeySelector, ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::{make_error_msg, Result, StatusCode};

use crate::key_prefix;
use crate::types::{Ino, Slice, CHUNK_SIZE};

pub const RECORD_SIZE: usize = 24;

/// One history record: `slice` placed at byte `pos` of the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceRecord {
    pub pos: u32,
    pub slice: Slice,
}

impl SliceRecord {
    pub fn new(pos: u32, slice: Slice) -> Self {
        Self { pos, slice }
    }

    pub fn end(&self) -> u64 {
        u64::from(self.pos) + u64::from(self.slice.len)
    }
}

pub fn pack_prefix(ino: Ino) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.put_u8(key_prefix::CHUNK_PREFIX);
    key.put_u64(ino);
    key
}

/// `[CHUNK_PREFIX][ino BE][indx BE]`
pub fn pack_key(ino: Ino, indx: u32) -> Vec<u8> {
    let mut key = pack_prefix(ino);
    key.put_u32(indx);
    key
}

fn unpack_indx(key: &[u8]) -> Result<u32> {
    if key.len() != 13 || key[0] != key_prefix::CHUNK_PREFIX {
        return make_error_msg(StatusCode::DATA_CORRUPTION, "invalid chunk key format");
    }
    Ok((&key[9..]).get_u32())
}

pub fn encode_records(records: &[SliceRecord]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(records.len() * RECORD_SIZE);
    for r in records {
        encode_record(&mut buf, r);
    }
    buf
}

fn encode_record(buf: &mut Vec<u8>, r: &SliceRecord) {
    buf.put_u32(r.pos);
    buf.put_u64(r.slice.chunkid);
    buf.put_u32(r.slice.clen);
    buf.put_u32(r.slice.off);
    buf.put_u32(r.slice.len);
}

pub fn decode_records(mut buf: &[u8]) -> Result<Vec<SliceRecord>> {
    if buf.len() % RECORD_SIZE != 0 {
        return make_error_msg(
            StatusCode::DATA_CORRUPTION,
            format!("chunk history of {} bytes", buf.len()),
        );
    }
    let mut records = Vec::with_capacity(buf.len() / RECORD_SIZE);
    while buf.has_remaining() {
        let pos = buf.get_u32();
        let chunkid = buf.get_u64();
        let clen = buf.get_u32();
        let off = buf.get_u32();
        let len = buf.get_u32();
        records.push(SliceRecord::new(pos, Slice::new(chunkid, clen, off, len)));
    }
    Ok(records)
}

pub async fn load<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    ino: Ino,
    indx: u32,
) -> Result<Vec<SliceRecord>> {
    match txn.get(&pack_key(ino, indx)).await? {
        Some(v) => decode_records(&v),
        None => Ok(Vec::new()),
    }
}

pub async fn snapshot_load<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    ino: Ino,
    indx: u32,
) -> Result<Vec<SliceRecord>> {
    match txn.snapshot_get(&pack_key(ino, indx)).await? {
        Some(v) => decode_records(&v),
        None => Ok(Vec::new()),
    }
}

/// Appends `record` to the history of `(ino, indx)`; returns the new length.
pub async fn append(
    txn: &mut dyn ReadWriteTransaction,
    ino: Ino,
    indx: u32,
    record: SliceRecord,
) -> Result<usize> {
    let key = pack_key(ino, indx);
    let mut value = txn.get(&key).await?.unwrap_or_default();
    if value.len() % RECORD_SIZE != 0 {
        return make_error_msg(
            StatusCode::DATA_CORRUPTION,
            format!("chunk ({}, {}) history of {} bytes", ino, indx, value.len()),
        );
    }
    encode_record(&mut value, &record);
    txn.set(&key, &value).await?;
    Ok(value.len() / RECORD_SIZE)
}

pub async fn store(
    txn: &mut dyn ReadWriteTransaction,
    ino: Ino,
    indx: u32,
    records: &[SliceRecord],
) -> Result<()> {
    txn.set(&pack_key(ino, indx), &encode_records(records)).await
}

pub async fn remove(txn: &mut dyn ReadWriteTransaction, ino: Ino, indx: u32) -> Result<()> {
    txn.clear(&pack_key(ino, indx)).await
}

/// Histories of the chunks of `ino` with index `>= from`, at most `limit`
/// of them (`0` for all), in index order. The scan joins the read set.
pub async fn list<T: ReadOnlyTransaction + ?Sized>(
    txn: &T,
    ino: Ino,
    from: u32,
    limit: usize,
) -> Result<(Vec<(u32, Vec<SliceRecord>)>, bool)> {
    let begin = KeySelector::new(pack_key(ino, from), true);
    let end = KeySelector::new(prefix_list_end_key(&pack_prefix(ino)), false);
    let limit = i32::try_from(limit).unwrap_or(i32::MAX);
    let result = txn.get_range(&begin, &end, limit).await?;
    let chunks = result
        .kvs
        .iter()
        .map(|kv| Ok((unpack_indx(&kv.key)?, decode_records(&kv.value)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok((chunks, result.has_more))
}

/// Distinct content objects referenced by `records`, holes excluded.
pub fn content_ids(records: &[SliceRecord]) -> Vec<(u64, u32)> {
    let mut ids: Vec<(u64, u32)> = records
        .iter()
        .filter(|r| !r.slice.is_hole())
        .map(|r| (r.slice.chunkid, r.slice.clen))
        .collect();
    ids.sort_unstable();
    ids.dedup_by_key(|(id, _)| *id);
    ids
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    start: u64,
    end: u64,
    chunkid: u64,
    clen: u32,
    off: u32,
}

/// Flattens a history into contiguous slices covering `[0, extent)`, where
/// `extent` is the end of the furthest record. Uncovered gaps and hole
/// records come back as slices with `chunkid == 0`.
pub fn build_read_plan(records: &[SliceRecord]) -> Vec<Slice> {
    let mut segments: Vec<Segment> = Vec::new();
    for r in records {
        if r.slice.len == 0 {
            continue;
        }
        let (start, end) = (u64::from(r.pos), r.end().min(CHUNK_SIZE));
        let mut next = Vec::with_capacity(segments.len() + 2);
        for seg in segments.drain(..) {
            if seg.end <= start || seg.start >= end {
                next.push(seg);
                continue;
            }
            if seg.start < start {
                next.push(Segment { end: start, ..seg });
            }
            if seg.end > end {
                next.push(Segment {
                    start: end,
                    off: seg.off + (end - seg.start) as u32,
                    ..seg
                });
            }
        }
        next.push(Segment {
            start,
            end,
            chunkid: r.slice.chunkid,
            clen: r.slice.clen,
            off: r.slice.off,
        });
        next.sort_by_key(|s| s.start);
        segments = next;
    }

    let mut plan: Vec<Slice> = Vec::with_capacity(segments.len());
    let mut cursor = 0u64;
    for seg in segments {
        if seg.start > cursor {
            push_hole(&mut plan, (seg.start - cursor) as u32);
        }
        let len = (seg.end - seg.start) as u32;
        if seg.chunkid == 0 {
            push_hole(&mut plan, len);
        } else {
            plan.push(Slice::new(seg.chunkid, seg.clen, seg.off, len));
        }
        cursor = seg.end;
    }
    plan
}

fn push_hole(plan: &mut Vec<Slice>, len: u32) {
    if let Some(last) = plan.last_mut() {
        if last.is_hole() {
            last.len += len;
            last.clen = last.len;
            return;
        }
    }
    plan.push(Slice::hole(len));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pos: u32, id: u64, len: u32) -> SliceRecord {
        SliceRecord::new(pos, Slice::new(id, len, 0, len))
    }

    #[test]
    fn test_record_layout() {
        let bytes = encode_records(&[SliceRecord::new(1, Slice::new(2, 3, 4, 5))]);
        assert_eq!(bytes.len(), RECORD_SIZE);
        assert_eq!(&bytes[..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[4..12], &2u64.to_be_bytes());
        assert_eq!(&bytes[20..], &[0, 0, 0, 5]);
        assert_eq!(decode_records(&bytes).unwrap(), vec![SliceRecord::new(1, Slice::new(2, 3, 4, 5))]);
    }

    #[test]
    fn test_decode_rejects_torn_value() {
        assert_eq!(
            decode_records(&[0u8; 25]).unwrap_err().code(),
            StatusCode::DATA_CORRUPTION
        );
    }

    #[test]
    fn test_chunk_keys_sort_by_index() {
        assert!(pack_key(1, 2) < pack_key(1, 256));
        assert!(pack_key(1, u32::MAX) < pack_key(2, 0));
        assert_eq!(unpack_indx(&pack_key(9, 77)).unwrap(), 77);
    }

    #[test]
    fn test_later_write_wins() {
        // [0,100) from A, then [50,150) from B.
        let plan = build_read_plan(&[rec(0, 1, 100), rec(50, 2, 100)]);
        assert_eq!(plan, vec![Slice::new(1, 100, 0, 50), Slice::new(2, 100, 0, 100)]);
    }

    #[test]
    fn test_overwrite_in_the_middle_splits() {
        let plan = build_read_plan(&[rec(0, 1, 300), rec(100, 2, 50)]);
        assert_eq!(
            plan,
            vec![
                Slice::new(1, 300, 0, 100),
                Slice::new(2, 50, 0, 50),
                Slice::new(1, 300, 150, 150),
            ]
        );
    }

    #[test]
    fn test_gap_reads_as_hole() {
        let plan = build_read_plan(&[rec(1000, 5, 10)]);
        assert_eq!(plan, vec![Slice::hole(1000), Slice::new(5, 10, 0, 10)]);
    }

    #[test]
    fn test_hole_record_masks_content() {
        let plan = build_read_plan(&[
            rec(0, 1, 100),
            SliceRecord::new(40, Slice::hole(60)),
        ]);
        assert_eq!(plan, vec![Slice::new(1, 100, 0, 40), Slice::hole(60)]);
    }

    #[test]
    fn test_adjacent_holes_merge() {
        let plan = build_read_plan(&[
            SliceRecord::new(10, Slice::hole(10)),
            rec(30, 3, 5),
        ]);
        assert_eq!(plan, vec![Slice::hole(30), Slice::new(3, 5, 0, 5)]);
    }

    #[test]
    fn test_content_ids_skip_holes_and_duplicates() {
        let records = [rec(0, 7, 10), SliceRecord::new(0, Slice::hole(5)), rec(10, 7, 10), rec(20, 3, 4)];
        assert_eq!(content_ids(&records), vec![(3, 4), (7, 10)]);
    }
}
