use async_trait::async_trait;
use slicefs_types::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Boundary of a range scan.
#[derive(Debug, Clone)]
pub struct KeySelector {
    pub key: Vec<u8>,
    pub inclusive: bool,
}

impl KeySelector {
    pub fn new(key: impl Into<Vec<u8>>, inclusive: bool) -> Self {
        Self {
            key: key.into(),
            inclusive,
        }
    }
}

#[derive(Debug, Default)]
pub struct GetRangeResult {
    pub kvs: Vec<KeyValue>,
    pub has_more: bool,
}

/// Read side of a transaction.
///
/// `get`/`get_range` register what they read for conflict detection at
/// commit; the `snapshot_*` variants read the same snapshot without doing so.
#[async_trait]
pub trait ReadOnlyTransaction: Send + Sync {
    fn set_read_version(&mut self, version: i64);

    async fn snapshot_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.snapshot_get(key).await
    }

    /// `limit <= 0` means unbounded.
    async fn snapshot_get_range(
        &self,
        begin: &KeySelector,
        end: &KeySelector,
        limit: i32,
    ) -> Result<GetRangeResult>;

    async fn get_range(
        &self,
        begin: &KeySelector,
        end: &KeySelector,
        limit: i32,
    ) -> Result<GetRangeResult>;

    async fn cancel(&mut self) -> Result<()>;

    fn reset(&mut self);
}

#[async_trait]
pub trait ReadWriteTransaction: ReadOnlyTransaction {
    async fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    async fn clear(&mut self, key: &[u8]) -> Result<()>;

    /// Clears every key in `[begin, end)`.
    async fn clear_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()>;

    /// Adds `delta` to the little-endian i64 stored at `key` (absent reads
    /// as zero) at commit time, without adding a read conflict.
    async fn atomic_add(&mut self, key: &[u8], delta: i64) -> Result<()>;

    async fn add_read_conflict(&mut self, key: &[u8]) -> Result<()>;

    async fn add_read_conflict_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    fn get_committed_version(&self) -> i64;
}
