//! In-memory KV store backed by a `BTreeMap`.
//!
//! Transactions read from a private snapshot taken at creation and buffer
//! their mutations. At commit every key and range read through `get` /
//! `get_range` (or declared with `add_read_conflict*`) is checked against the
//! version that last wrote it; if anything changed after the snapshot the
//! commit fails with `TransactionCode::CONFLICT` and nothing is applied.
//!
//! The snapshot is a full copy of the map, so starting a transaction costs
//! O(store size). Meant for tests and single-process deployments with small
//! namespaces.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use slicefs_kv::{
    decode_counter, key_after, GetRangeResult, KeySelector, KeyValue, KvEngine,
    ReadOnlyTransaction, ReadWriteTransaction,
};
use slicefs_types::{make_error_msg, Result, Status, StatusCode, TransactionCode};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// Half-open key range; `None` as the end means unbounded.
type KeyRange = (Vec<u8>, Option<Vec<u8>>);

#[derive(Default)]
struct State {
    data: Map,
    /// Commit version that last wrote or removed each key.
    write_versions: BTreeMap<Vec<u8>, i64>,
    version: i64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemDbEngine {
    state: Arc<RwLock<State>>,
    injected_conflicts: Arc<AtomicU32>,
}

impl MemDbEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().data.is_empty()
    }

    /// Current committed version.
    pub fn version(&self) -> i64 {
        self.state.read().version
    }

    /// Makes the next `n` read-write commits fail with a conflict.
    pub fn inject_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    fn snapshot(&self) -> (Map, i64) {
        let state = self.state.read();
        (state.data.clone(), state.version)
    }
}

impl KvEngine for MemDbEngine {
    type RoTxn = MemDbReadOnlyTxn;
    type RwTxn = MemDbReadWriteTxn;

    fn create_readonly_transaction(&self) -> Self::RoTxn {
        let (snapshot, read_version) = self.snapshot();
        MemDbReadOnlyTxn {
            snapshot,
            read_version,
        }
    }

    fn create_readwrite_transaction(&self) -> Self::RwTxn {
        let (view, read_version) = self.snapshot();
        MemDbReadWriteTxn {
            view,
            read_version,
            reads: Mutex::new(Vec::new()),
            mutations: Vec::new(),
            engine: self.clone(),
            committed_version: -1,
        }
    }
}

// ---------------------------------------------------------------------------
// Range helpers
// ---------------------------------------------------------------------------

fn selector_bounds(begin: &KeySelector, end: &KeySelector) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let start = if begin.inclusive {
        Bound::Included(begin.key.clone())
    } else {
        Bound::Excluded(begin.key.clone())
    };
    let stop = if end.key.is_empty() && !end.inclusive {
        Bound::Unbounded
    } else if end.inclusive {
        Bound::Included(end.key.clone())
    } else {
        Bound::Excluded(end.key.clone())
    };
    (start, stop)
}

fn collect_range(map: &Map, begin: &KeySelector, end: &KeySelector, limit: i32) -> GetRangeResult {
    let limit = if limit <= 0 { usize::MAX } else { limit as usize };
    let mut kvs = Vec::new();
    let mut has_more = false;
    for (k, v) in map.range(selector_bounds(begin, end)) {
        if kvs.len() >= limit {
            has_more = true;
            break;
        }
        kvs.push(KeyValue {
            key: k.clone(),
            value: v.clone(),
        });
    }
    GetRangeResult { kvs, has_more }
}

/// The part of `[begin, end]` a range read actually observed.
fn observed_range(begin: &KeySelector, end: &KeySelector, result: &GetRangeResult) -> KeyRange {
    let lo = if begin.inclusive {
        begin.key.clone()
    } else {
        key_after(&begin.key)
    };
    let hi = match result.kvs.last() {
        Some(last) if result.has_more => Some(key_after(&last.key)),
        _ if end.key.is_empty() && !end.inclusive => None,
        _ if end.inclusive => Some(key_after(&end.key)),
        _ => Some(end.key.clone()),
    };
    (lo, hi)
}

fn range_written_after(state: &State, range: &KeyRange, read_version: i64) -> bool {
    let (lo, hi) = range;
    if let Some(hi) = hi {
        if hi <= lo {
            return false;
        }
    }
    let upper = match hi {
        Some(hi) => Bound::Excluded(hi.clone()),
        None => Bound::Unbounded,
    };
    state
        .write_versions
        .range((Bound::Included(lo.clone()), upper))
        .any(|(_, v)| *v > read_version)
}

// ---------------------------------------------------------------------------
// Read-only transaction
// ---------------------------------------------------------------------------

pub struct MemDbReadOnlyTxn {
    snapshot: Map,
    read_version: i64,
}

impl MemDbReadOnlyTxn {
    pub fn read_version(&self) -> i64 {
        self.read_version
    }
}

#[async_trait]
impl ReadOnlyTransaction for MemDbReadOnlyTxn {
    fn set_read_version(&mut self, version: i64) {
        self.read_version = version;
    }

    async fn snapshot_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.snapshot.get(key).cloned())
    }

    async fn snapshot_get_range(
        &self,
        begin: &KeySelector,
        end: &KeySelector,
        limit: i32,
    ) -> Result<GetRangeResult> {
        Ok(collect_range(&self.snapshot, begin, end, limit))
    }

    async fn get_range(
        &self,
        begin: &KeySelector,
        end: &KeySelector,
        limit: i32,
    ) -> Result<GetRangeResult> {
        self.snapshot_get_range(begin, end, limit).await
    }

    async fn cancel(&mut self) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) {
        self.snapshot.clear();
    }
}

// ---------------------------------------------------------------------------
// Read-write transaction
// ---------------------------------------------------------------------------

enum Mutation {
    Set(Vec<u8>, Vec<u8>),
    Clear(Vec<u8>),
    ClearRange(Vec<u8>, Vec<u8>),
    Add(Vec<u8>, i64),
}

/// Read-write transaction. Reads see the snapshot with this transaction's
/// own mutations applied.
pub struct MemDbReadWriteTxn {
    view: Map,
    read_version: i64,
    reads: Mutex<Vec<KeyRange>>,
    mutations: Vec<Mutation>,
    engine: MemDbEngine,
    committed_version: i64,
}

impl MemDbReadWriteTxn {
    fn record_read(&self, range: KeyRange) {
        self.reads.lock().push(range);
    }

    fn check_conflicts(&self, state: &State) -> Result<()> {
        let reads = self.reads.lock();
        for range in reads.iter() {
            if range_written_after(state, range, self.read_version) {
                return make_error_msg(
                    TransactionCode::CONFLICT,
                    format!("read set changed since version {}", self.read_version),
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ReadOnlyTransaction for MemDbReadWriteTxn {
    fn set_read_version(&mut self, version: i64) {
        self.read_version = version;
    }

    async fn snapshot_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.view.get(key).cloned())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.record_read((key.to_vec(), Some(key_after(key))));
        self.snapshot_get(key).await
    }

    async fn snapshot_get_range(
        &self,
        begin: &KeySelector,
        end: &KeySelector,
        limit: i32,
    ) -> Result<GetRangeResult> {
        Ok(collect_range(&self.view, begin, end, limit))
    }

    async fn get_range(
        &self,
        begin: &KeySelector,
        end: &KeySelector,
        limit: i32,
    ) -> Result<GetRangeResult> {
        let result = collect_range(&self.view, begin, end, limit);
        self.record_read(observed_range(begin, end, &result));
        Ok(result)
    }

    async fn cancel(&mut self) -> Result<()> {
        self.mutations.clear();
        self.reads.lock().clear();
        Ok(())
    }

    fn reset(&mut self) {
        let (view, read_version) = self.engine.snapshot();
        self.view = view;
        self.read_version = read_version;
        self.mutations.clear();
        self.reads.lock().clear();
        self.committed_version = -1;
    }
}

#[async_trait]
impl ReadWriteTransaction for MemDbReadWriteTxn {
    async fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.view.insert(key.to_vec(), value.to_vec());
        self.mutations.push(Mutation::Set(key.to_vec(), value.to_vec()));
        Ok(())
    }

    async fn clear(&mut self, key: &[u8]) -> Result<()> {
        self.view.remove(key);
        self.mutations.push(Mutation::Clear(key.to_vec()));
        Ok(())
    }

    async fn clear_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()> {
        if end <= begin {
            return Ok(());
        }
        let doomed: Vec<Vec<u8>> = self
            .view
            .range(begin.to_vec()..end.to_vec())
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            self.view.remove(&key);
        }
        self.mutations
            .push(Mutation::ClearRange(begin.to_vec(), end.to_vec()));
        Ok(())
    }

    async fn atomic_add(&mut self, key: &[u8], delta: i64) -> Result<()> {
        let current = self.view.get(key).map(|v| decode_counter(v)).unwrap_or(0);
        self.view
            .insert(key.to_vec(), current.wrapping_add(delta).to_le_bytes().to_vec());
        self.mutations.push(Mutation::Add(key.to_vec(), delta));
        Ok(())
    }

    async fn add_read_conflict(&mut self, key: &[u8]) -> Result<()> {
        self.record_read((key.to_vec(), Some(key_after(key))));
        Ok(())
    }

    async fn add_read_conflict_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()> {
        self.record_read((begin.to_vec(), Some(end.to_vec())));
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.committed_version >= 0 {
            return make_error_msg(StatusCode::INVALID_ARG, "transaction already committed");
        }
        if self.mutations.is_empty() {
            self.committed_version = self.read_version;
            return Ok(());
        }

        let injected = self
            .engine
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Status::with_message(TransactionCode::CONFLICT, "injected conflict"));
        }

        let mut state = self.engine.state.write();
        self.check_conflicts(&state)?;

        let version = state.version + 1;
        for mutation in self.mutations.drain(..) {
            match mutation {
                Mutation::Set(key, value) => {
                    state.write_versions.insert(key.clone(), version);
                    state.data.insert(key, value);
                }
                Mutation::Clear(key) => {
                    state.data.remove(&key);
                    state.write_versions.insert(key, version);
                }
                Mutation::ClearRange(begin, end) => {
                    let doomed: Vec<Vec<u8>> =
                        state.data.range(begin..end).map(|(k, _)| k.clone()).collect();
                    for key in doomed {
                        state.data.remove(&key);
                        state.write_versions.insert(key, version);
                    }
                }
                Mutation::Add(key, delta) => {
                    let current = state.data.get(&key).map(|v| decode_counter(v)).unwrap_or(0);
                    state
                        .data
                        .insert(key.clone(), current.wrapping_add(delta).to_le_bytes().to_vec());
                    state.write_versions.insert(key, version);
                }
            }
        }
        state.version = version;
        self.committed_version = version;
        tracing::trace!(version, "memdb: committed");
        Ok(())
    }

    fn get_committed_version(&self) -> i64 {
        self.committed_version
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use slicefs_kv::prefix_range;

    async fn put(engine: &MemDbEngine, pairs: &[(&[u8], &[u8])]) {
        let mut txn = engine.create_readwrite_transaction();
        for (k, v) in pairs {
            txn.set(k, v).await.unwrap();
        }
        txn.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_get_clear() {
        let engine = MemDbEngine::new();
        put(&engine, &[(b"a", b"1"), (b"b", b"2")]).await;
        assert_eq!(engine.len(), 2);

        let mut txn = engine.create_readwrite_transaction();
        txn.clear(b"a").await.unwrap();
        txn.commit().await.unwrap();

        let ro = engine.create_readonly_transaction();
        assert_eq!(ro.get(b"a").await.unwrap(), None);
        assert_eq!(ro.get(b"b").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_reads_own_writes() {
        let engine = MemDbEngine::new();
        put(&engine, &[(b"k", b"old")]).await;

        let mut txn = engine.create_readwrite_transaction();
        txn.set(b"k", b"new").await.unwrap();
        txn.set(b"k2", b"x").await.unwrap();
        assert_eq!(txn.get(b"k").await.unwrap(), Some(b"new".to_vec()));
        let (b, e) = prefix_range(b"k");
        assert_eq!(txn.get_range(&b, &e, 0).await.unwrap().kvs.len(), 2);

        let other = engine.create_readonly_transaction();
        assert_eq!(other.get(b"k").await.unwrap(), Some(b"old".to_vec()));
    }

    #[tokio::test]
    async fn test_snapshot_isolation() {
        let engine = MemDbEngine::new();
        put(&engine, &[(b"x", b"before")]).await;
        let ro = engine.create_readonly_transaction();
        put(&engine, &[(b"x", b"after")]).await;
        assert_eq!(ro.get(b"x").await.unwrap(), Some(b"before".to_vec()));
    }

    #[tokio::test]
    async fn test_conflicting_point_read() {
        let engine = MemDbEngine::new();

        let mut t1 = engine.create_readwrite_transaction();
        let mut t2 = engine.create_readwrite_transaction();
        assert_eq!(t1.get(b"name").await.unwrap(), None);
        assert_eq!(t2.get(b"name").await.unwrap(), None);
        t1.set(b"name", b"1").await.unwrap();
        t2.set(b"name", b"2").await.unwrap();

        t1.commit().await.unwrap();
        let err = t2.commit().await.unwrap_err();
        assert_eq!(err.code(), TransactionCode::CONFLICT);
        assert!(err.is_retryable());

        let ro = engine.create_readonly_transaction();
        assert_eq!(ro.get(b"name").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_snapshot_read_does_not_conflict() {
        let engine = MemDbEngine::new();
        let mut t1 = engine.create_readwrite_transaction();
        let mut t2 = engine.create_readwrite_transaction();
        t1.snapshot_get(b"k").await.unwrap();
        t2.set(b"k", b"v").await.unwrap();
        t2.commit().await.unwrap();
        t1.set(b"other", b"v").await.unwrap();
        t1.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_range_read_conflicts_with_insert() {
        let engine = MemDbEngine::new();
        put(&engine, &[(b"d/a", b"1")]).await;

        let mut scanner = engine.create_readwrite_transaction();
        let (b, e) = prefix_range(b"d/");
        assert_eq!(scanner.get_range(&b, &e, 0).await.unwrap().kvs.len(), 1);

        put(&engine, &[(b"d/b", b"2")]).await;

        scanner.set(b"marker", b"").await.unwrap();
        let err = scanner.commit().await.unwrap_err();
        assert_eq!(err.code(), TransactionCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_limited_range_only_covers_observed_keys() {
        let engine = MemDbEngine::new();
        put(&engine, &[(b"d/a", b""), (b"d/b", b""), (b"d/c", b"")]).await;

        let mut pager = engine.create_readwrite_transaction();
        let (b, e) = prefix_range(b"d/");
        let page = pager.get_range(&b, &e, 1).await.unwrap();
        assert!(page.has_more);

        put(&engine, &[(b"d/z", b"")]).await;

        pager.set(b"marker", b"").await.unwrap();
        pager.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_declared_conflict_range() {
        let engine = MemDbEngine::new();
        let mut t1 = engine.create_readwrite_transaction();
        t1.add_read_conflict_range(b"p", b"q").await.unwrap();
        put(&engine, &[(b"pz", b"")]).await;
        t1.set(b"x", b"").await.unwrap();
        assert!(t1.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_atomic_add_is_blind() {
        let engine = MemDbEngine::new();
        let mut t1 = engine.create_readwrite_transaction();
        let mut t2 = engine.create_readwrite_transaction();
        t1.atomic_add(b"used", 10).await.unwrap();
        t2.atomic_add(b"used", -3).await.unwrap();
        assert_eq!(decode_counter(&t1.snapshot_get(b"used").await.unwrap().unwrap()), 10);
        t1.commit().await.unwrap();
        t2.commit().await.unwrap();

        let ro = engine.create_readonly_transaction();
        assert_eq!(decode_counter(&ro.get(b"used").await.unwrap().unwrap()), 7);
    }

    #[tokio::test]
    async fn test_clear_range() {
        let engine = MemDbEngine::new();
        put(&engine, &[(b"c/1", b""), (b"c/2", b""), (b"c/3", b""), (b"d", b"")]).await;

        let mut txn = engine.create_readwrite_transaction();
        txn.clear_range(b"c/1", b"c/3").await.unwrap();
        assert_eq!(txn.snapshot_get(b"c/2").await.unwrap(), None);
        txn.commit().await.unwrap();

        let ro = engine.create_readonly_transaction();
        let (b, e) = prefix_range(b"c/");
        let left = ro.get_range(&b, &e, 0).await.unwrap();
        assert_eq!(left.kvs.len(), 1);
        assert_eq!(left.kvs[0].key, b"c/3");
    }

    #[tokio::test]
    async fn test_injected_conflict() {
        let engine = MemDbEngine::new();
        engine.inject_conflicts(1);

        let mut t1 = engine.create_readwrite_transaction();
        t1.set(b"a", b"").await.unwrap();
        assert_eq!(t1.commit().await.unwrap_err().code(), TransactionCode::CONFLICT);

        let mut t2 = engine.create_readwrite_transaction();
        t2.set(b"a", b"").await.unwrap();
        t2.commit().await.unwrap();
        assert!(t2.get_committed_version() > 0);
    }

    #[tokio::test]
    async fn test_cancel_and_reset() {
        let engine = MemDbEngine::new();
        let mut txn = engine.create_readwrite_transaction();
        txn.set(b"temp", b"data").await.unwrap();
        txn.cancel().await.unwrap();
        txn.commit().await.unwrap();
        assert!(engine.is_empty());

        let mut txn = engine.create_readwrite_transaction();
        txn.set(b"temp", b"data").await.unwrap();
        txn.reset();
        assert_eq!(txn.get(b"temp").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_double_commit_rejected() {
        let engine = MemDbEngine::new();
        let mut txn = engine.create_readwrite_transaction();
        txn.set(b"k", b"v").await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(txn.commit().await.unwrap_err().code(), StatusCode::INVALID_ARG);
    }

    #[tokio::test]
    async fn test_versions_increase() {
        let engine = MemDbEngine::new();
        let mut t1 = engine.create_readwrite_transaction();
        t1.set(b"a", b"").await.unwrap();
        t1.commit().await.unwrap();
        let mut t2 = engine.create_readwrite_transaction();
        t2.set(b"b", b"").await.unwrap();
        t2.commit().await.unwrap();
        assert!(t2.get_committed_version() > t1.get_committed_version());
        assert_eq!(engine.version(), t2.get_committed_version());
    }
}
