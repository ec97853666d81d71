//! Filesystem-wide counters and batched id allocation.

use std::ops::Range;

use bytes::BufMut;
use slicefs_kv::{decode_counter, KvEngine, ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::{make_error_msg, MetaCode, Result};
use tokio::sync::Mutex;

use crate::key_prefix;
use crate::retry::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    NextInode,
    NextChunk,
    UsedSpace,
    TotalInodes,
}

impl Counter {
    fn name(self) -> &'static [u8] {
        match self {
            Counter::NextInode => b"nextInode",
            Counter::NextChunk => b"nextChunk",
            Counter::UsedSpace => b"usedSpace",
            Counter::TotalInodes => b"totalInodes",
        }
    }

    pub fn key(self) -> Vec<u8> {
        let name = self.name();
        let mut key = Vec::with_capacity(1 + name.len());
        key.put_u8(key_prefix::COUNTER_PREFIX);
        key.put_slice(name);
        key
    }
}

pub async fn snapshot_read<T: ReadOnlyTransaction + ?Sized>(txn: &T, counter: Counter) -> Result<i64> {
    Ok(txn
        .snapshot_get(&counter.key())
        .await?
        .map(|v| decode_counter(&v))
        .unwrap_or(0))
}

pub async fn add(txn: &mut dyn ReadWriteTransaction, counter: Counter, delta: i64) -> Result<()> {
    if delta == 0 {
        return Ok(());
    }
    txn.atomic_add(&counter.key(), delta).await
}

pub async fn set(txn: &mut dyn ReadWriteTransaction, counter: Counter, value: i64) -> Result<()> {
    txn.set(&counter.key(), &value.to_le_bytes()).await
}

/// Hands out ids from a store-backed counter, reserving `batch` at a time.
///
/// Reservations run in their own transaction, so ids of an aborted
/// operation are skipped rather than reused.
pub struct IdAllocator {
    counter: Counter,
    batch: u64,
    reserved: Mutex<Range<u64>>,
}

impl IdAllocator {
    pub fn new(counter: Counter, batch: u64) -> Self {
        Self {
            counter,
            batch: batch.max(1),
            reserved: Mutex::new(0..0),
        }
    }

    pub async fn next<E: KvEngine>(&self, engine: &E, mut backoff: Backoff) -> Result<u64> {
        let mut reserved = self.reserved.lock().await;
        if let Some(id) = reserved.next() {
            return Ok(id);
        }
        loop {
            match self.reserve(engine).await {
                Ok(range) => {
                    tracing::debug!(counter = ?self.counter, start = range.start, end = range.end, "ids: reserved batch");
                    *reserved = range;
                    return reserved.next().ok_or_else(|| {
                        slicefs_types::Status::new(MetaCode::INODE_ID_ALLOC_FAILED)
                    });
                }
                Err(e) if e.is_retryable() => match backoff.next_wait() {
                    Some(wait) => tokio::time::sleep(wait).await,
                    None => {
                        return make_error_msg(
                            MetaCode::INODE_ID_ALLOC_FAILED,
                            format!("{:?}: {}", self.counter, e),
                        )
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn reserve<E: KvEngine>(&self, engine: &E) -> Result<Range<u64>> {
        let mut txn = engine.create_readwrite_transaction();
        let key = self.counter.key();
        let current = txn.get(&key).await?.map(|v| decode_counter(&v)).unwrap_or(0);
        let start = u64::try_from(current).unwrap_or(0).max(1);
        let end = start + self.batch;
        txn.set(&key, &(end as i64).to_le_bytes()).await?;
        txn.commit().await?;
        Ok(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slicefs_kv_backends::MemDbEngine;
    use std::time::Duration;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_millis(1), Duration::from_millis(2), 5)
    }

    #[tokio::test]
    async fn test_ids_are_unique_across_allocators() {
        let engine = MemDbEngine::new();
        let a = IdAllocator::new(Counter::NextChunk, 3);
        let b = IdAllocator::new(Counter::NextChunk, 3);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10 {
            assert!(seen.insert(a.next(&engine, backoff()).await.unwrap()));
            assert!(seen.insert(b.next(&engine, backoff()).await.unwrap()));
        }
        assert!(!seen.contains(&0));
    }

    #[tokio::test]
    async fn test_continues_from_stored_counter() {
        let engine = MemDbEngine::new();
        let mut txn = engine.create_readwrite_transaction();
        set(&mut txn, Counter::NextInode, 2).await.unwrap();
        txn.commit().await.unwrap();

        let alloc = IdAllocator::new(Counter::NextInode, 10);
        assert_eq!(alloc.next(&engine, backoff()).await.unwrap(), 2);
        assert_eq!(alloc.next(&engine, backoff()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retries_conflicts() {
        let engine = MemDbEngine::new();
        engine.inject_conflicts(2);
        let alloc = IdAllocator::new(Counter::NextChunk, 1);
        assert_eq!(alloc.next(&engine, backoff()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_counters_accumulate() {
        let engine = MemDbEngine::new();
        let mut txn = engine.create_readwrite_transaction();
        add(&mut txn, Counter::UsedSpace, 4096).await.unwrap();
        add(&mut txn, Counter::UsedSpace, -1024).await.unwrap();
        txn.commit().await.unwrap();
        let ro = engine.create_readonly_transaction();
        assert_eq!(snapshot_read(&ro, Counter::UsedSpace).await.unwrap(), 3072);
        assert_eq!(snapshot_read(&ro, Counter::TotalInodes).await.unwrap(), 0);
    }
}
