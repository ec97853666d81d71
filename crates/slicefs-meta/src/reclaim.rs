//! Deferred reclamation of deleted file content.
//!
//! Deleting the last link of a file removes its inode and leaves a delfile
//! record `[DELFILE_PREFIX][ino] -> length`. The chunk histories are then
//! cleared here in bounded transactions, announcing every freed content id
//! with `CHUNK_DEL`, and the delfile record goes last. A sweep over the
//! delfile records finishes work cut short by a failure or crash.
//!
//! The ids freed by a batch are written to an unannounced record in the same
//! transaction that drops the histories, and stay there until their
//! notification succeeded. Delivery is at least once: a crash between a
//! successful dispatch and the next commit announces those ids again.

use std::sync::Arc;

use bytes::{Buf, BufMut};
use slicefs_kv::{prefix_range, KvEngine, ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::{make_error_msg, Result, SessionId, StatusCode};

use crate::background::BackgroundRunner;
use crate::chunk;
use crate::config::MetaConfig;
use crate::event::{EventDispatcher, Message};
use crate::key_prefix;
use crate::retry::{with_rw_txn, Backoff};
use crate::types::Ino;

pub fn pack_delfile_key(ino: Ino) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.put_u8(key_prefix::DELFILE_PREFIX);
    key.put_u64(ino);
    key
}

fn unpack_delfile_key(key: &[u8]) -> Result<Ino> {
    if key.len() != 9 || key[0] != key_prefix::DELFILE_PREFIX {
        return make_error_msg(StatusCode::DATA_CORRUPTION, "invalid delfile key format");
    }
    Ok((&key[1..]).get_u64())
}

/// `[SUSTAINED_PREFIX][sid BE][ino BE]`
pub fn pack_sustained_key(sid: SessionId, ino: Ino) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.put_u8(key_prefix::SUSTAINED_PREFIX);
    key.put_u64(sid.get());
    key.put_u64(ino);
    key
}

/// `[UNANNOUNCED_PREFIX][ino BE]`
pub fn pack_unannounced_key(ino: Ino) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.put_u8(key_prefix::UNANNOUNCED_PREFIX);
    key.put_u64(ino);
    key
}

const CONTENT_ID_SIZE: usize = 12;

fn encode_content_ids(ids: &[(u64, u32)]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ids.len() * CONTENT_ID_SIZE);
    for (chunkid, clen) in ids {
        buf.put_u64(*chunkid);
        buf.put_u32(*clen);
    }
    buf
}

fn decode_content_ids(mut buf: &[u8]) -> Result<Vec<(u64, u32)>> {
    if buf.len() % CONTENT_ID_SIZE != 0 {
        return make_error_msg(
            StatusCode::DATA_CORRUPTION,
            format!("unannounced record of {} bytes", buf.len()),
        );
    }
    let mut ids = Vec::with_capacity(buf.len() / CONTENT_ID_SIZE);
    while buf.has_remaining() {
        let chunkid = buf.get_u64();
        let clen = buf.get_u32();
        ids.push((chunkid, clen));
    }
    Ok(ids)
}

pub async fn mark_deleted(txn: &mut dyn ReadWriteTransaction, ino: Ino, length: u64) -> Result<()> {
    txn.set(&pack_delfile_key(ino), &length.to_be_bytes()).await
}

/// Inodes with pending reclamation, in id order.
pub async fn pending<T: ReadOnlyTransaction + ?Sized>(txn: &T, limit: usize) -> Result<Vec<Ino>> {
    let (begin, end) = prefix_range(&[key_prefix::DELFILE_PREFIX]);
    let limit = i32::try_from(limit).unwrap_or(i32::MAX);
    let result = txn.snapshot_get_range(&begin, &end, limit).await?;
    result.kvs.iter().map(|kv| unpack_delfile_key(&kv.key)).collect()
}

pub struct Reclaimer<E: KvEngine> {
    engine: Arc<E>,
    events: Arc<EventDispatcher>,
    config: Arc<MetaConfig>,
}

impl<E: KvEngine> Clone for Reclaimer<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            events: self.events.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: KvEngine> Reclaimer<E> {
    pub fn new(engine: Arc<E>, events: Arc<EventDispatcher>, config: Arc<MetaConfig>) -> Self {
        Self {
            engine,
            events,
            config,
        }
    }

    /// Clears the content of deleted file `ino`. Returns the number of chunk
    /// histories removed.
    ///
    /// Ids left unannounced by an earlier failed attempt are delivered first.
    /// A failed notification stops the attempt with the ids still recorded.
    pub async fn reclaim_file(&self, ino: Ino) -> Result<usize> {
        let batch = self.config.max_reclaim_chunks_per_txn.max(1);
        let leftover = {
            let txn = self.engine.create_readonly_transaction();
            match txn.snapshot_get(&pack_unannounced_key(ino)).await? {
                Some(v) => decode_content_ids(&v)?,
                None => Vec::new(),
            }
        };
        if !leftover.is_empty() {
            tracing::info!(ino, ids = leftover.len(), "reclaim: announcing leftover content ids");
            self.announce(leftover)?;
        }

        let mut removed = 0;
        loop {
            let ((ids, count, more), _) =
                with_rw_txn!(&*self.engine, Backoff::from_config(&self.config), "reclaim", |txn, _out| {
                    clear_batch(txn, ino, batch).await
                })?;
            removed += count;
            self.announce(ids)?;
            if !more {
                break;
            }
        }
        with_rw_txn!(&*self.engine, Backoff::from_config(&self.config), "reclaim", |txn, _out| {
            txn.clear(&pack_unannounced_key(ino)).await?;
            txn.clear(&pack_delfile_key(ino)).await
        })?;
        tracing::debug!(ino, chunks = removed, "reclaim: file content released");
        Ok(removed)
    }

    fn announce(&self, ids: Vec<(u64, u32)>) -> Result<()> {
        let messages: Vec<Message> = ids
            .into_iter()
            .map(|(chunkid, clen)| Message::DeleteSlice { chunkid, clen })
            .collect();
        self.events.dispatch_all(&messages)
    }

    /// Reclaims every file with a pending delfile record. Failures are
    /// logged and left for the next sweep.
    pub async fn sweep(&self) -> Result<usize> {
        let txn = self.engine.create_readonly_transaction();
        let inodes = pending(&txn, 0).await?;
        let mut done = 0;
        for ino in inodes {
            match self.reclaim_file(ino).await {
                Ok(_) => done += 1,
                Err(e) => tracing::warn!(ino, error = %e, "reclaim: failed, will retry"),
            }
        }
        if done > 0 {
            tracing::info!(files = done, "reclaim: sweep finished");
        }
        Ok(done)
    }

    pub fn spawn_background(&self, runner: &mut BackgroundRunner) {
        let reclaimer = self.clone();
        runner.spawn_periodic("reclaim", self.config.reclaim_interval(), move || {
            let reclaimer = reclaimer.clone();
            async move {
                if let Err(e) = reclaimer.sweep().await {
                    tracing::warn!(error = %e, "reclaim: sweep failed");
                }
            }
        });
    }
}

/// Removes up to `batch` chunk histories of `ino` and records their content
/// ids as unannounced, replacing the ids of the previous batch. Returns the
/// ids, how many histories were removed and whether more remain.
async fn clear_batch(
    txn: &mut dyn ReadWriteTransaction,
    ino: Ino,
    batch: usize,
) -> Result<(Vec<(u64, u32)>, usize, bool)> {
    let (chunks, more) = chunk::list(&*txn, ino, 0, batch).await?;
    let mut ids = Vec::new();
    for (indx, records) in &chunks {
        ids.extend(chunk::content_ids(records));
        chunk::remove(txn, ino, *indx).await?;
    }
    let key = pack_unannounced_key(ino);
    if ids.is_empty() {
        txn.clear(&key).await?;
    } else {
        txn.set(&key, &encode_content_ids(&ids)).await?;
    }
    Ok((ids, chunks.len(), more))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::SliceRecord;
    use crate::event::CHUNK_DEL;
    use crate::types::Slice;
    use parking_lot::Mutex;
    use slicefs_kv_backends::MemDbEngine;

    async fn seed(engine: &MemDbEngine, ino: Ino, chunks: u32) {
        let mut txn = engine.create_readwrite_transaction();
        for indx in 0..chunks {
            let id = u64::from(indx) + 100;
            chunk::append(&mut txn, ino, indx, SliceRecord::new(0, Slice::new(id, 10, 0, 10)))
                .await
                .unwrap();
            chunk::append(&mut txn, ino, indx, SliceRecord::new(5, Slice::hole(5)))
                .await
                .unwrap();
        }
        mark_deleted(&mut txn, ino, 10).await.unwrap();
        txn.commit().await.unwrap();
    }

    fn reclaimer(engine: Arc<MemDbEngine>, batch: usize) -> (Reclaimer<MemDbEngine>, Arc<Mutex<Vec<u64>>>) {
        let events = Arc::new(EventDispatcher::new());
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let d = deleted.clone();
        events
            .on_msg(
                CHUNK_DEL,
                Box::new(move |msg| {
                    if let Message::DeleteSlice { chunkid, .. } = msg {
                        d.lock().push(*chunkid);
                    }
                    Ok(())
                }),
            )
            .unwrap();
        let config = Arc::new(MetaConfig {
            max_reclaim_chunks_per_txn: batch,
            ..Default::default()
        });
        (Reclaimer::new(engine, events, config), deleted)
    }

    #[tokio::test]
    async fn test_reclaim_in_batches() {
        let engine = Arc::new(MemDbEngine::new());
        seed(&engine, 7, 5).await;
        seed(&engine, 8, 1).await;
        let (reclaimer, deleted) = reclaimer(engine.clone(), 2);

        assert_eq!(reclaimer.reclaim_file(7).await.unwrap(), 5);
        assert_eq!(*deleted.lock(), vec![100, 101, 102, 103, 104]);

        let ro = engine.create_readonly_transaction();
        assert_eq!(pending(&ro, 0).await.unwrap(), vec![8]);
        assert!(chunk::snapshot_load(&ro, 7, 0).await.unwrap().is_empty());
        assert_eq!(chunk::snapshot_load(&ro, 8, 0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_finishes_everything() {
        let engine = Arc::new(MemDbEngine::new());
        seed(&engine, 3, 2).await;
        seed(&engine, 4, 1).await;
        let (reclaimer, deleted) = reclaimer(engine.clone(), 10);
        assert_eq!(reclaimer.sweep().await.unwrap(), 2);
        assert_eq!(deleted.lock().len(), 3);
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_failed_notify_keeps_ids_for_next_sweep() {
        let engine = Arc::new(MemDbEngine::new());
        seed(&engine, 5, 3).await;
        let events = Arc::new(EventDispatcher::new());
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let (d, c) = (deleted.clone(), calls.clone());
        events
            .on_msg(
                CHUNK_DEL,
                Box::new(move |msg| {
                    if c.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                        return make_error_msg(StatusCode::IO_ERROR, "object store down");
                    }
                    if let Message::DeleteSlice { chunkid, .. } = msg {
                        d.lock().push(*chunkid);
                    }
                    Ok(())
                }),
            )
            .unwrap();
        let config = Arc::new(MetaConfig {
            max_reclaim_chunks_per_txn: 2,
            ..Default::default()
        });
        let reclaimer = Reclaimer::new(engine.clone(), events, config);

        assert!(reclaimer.reclaim_file(5).await.is_err());
        {
            let ro = engine.create_readonly_transaction();
            assert_eq!(pending(&ro, 0).await.unwrap(), vec![5]);
            let left = ro.snapshot_get(&pack_unannounced_key(5)).await.unwrap().unwrap();
            assert_eq!(decode_content_ids(&left).unwrap(), vec![(100, 10), (101, 10)]);
        }

        assert_eq!(reclaimer.sweep().await.unwrap(), 1);
        let mut ids = deleted.lock().clone();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids, vec![100, 101, 102]);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_sustained_key_layout() {
        let key = pack_sustained_key(SessionId(1), 2);
        assert_eq!(key.len(), 17);
        assert_eq!(key[0], key_prefix::SUSTAINED_PREFIX);
        assert!(pack_sustained_key(SessionId(1), 3) > key);
        assert_eq!(unpack_delfile_key(&pack_delfile_key(42)).unwrap(), 42);
    }
}
