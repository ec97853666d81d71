//! Filesystem usage figures.

use slicefs_kv::ReadOnlyTransaction;
use slicefs_types::Result;

use crate::counters::{self, Counter};
use crate::meta_store::MetaStore;
use crate::types::StatFs;

/// Reported size of a filesystem without configured capacity.
const DEFAULT_TOTAL_SPACE: u64 = 1 << 50;
const DEFAULT_AVAIL_INODES: u64 = 10 << 20;

pub async fn stat_fs<T: ReadOnlyTransaction + ?Sized>(txn: &T, store: &MetaStore) -> Result<StatFs> {
    let used = counters::snapshot_read(txn, Counter::UsedSpace).await?.max(0) as u64;
    let iused = counters::snapshot_read(txn, Counter::TotalInodes).await?.max(0) as u64;
    let config = store.config();

    let total_space = if config.capacity_bytes > 0 {
        config.capacity_bytes.max(used)
    } else {
        // Keep reported usage below 80%.
        let mut total = DEFAULT_TOTAL_SPACE;
        while used.saturating_mul(10) > total.saturating_mul(8) {
            total = total.saturating_mul(2);
        }
        total
    };
    let iavail = if config.max_inodes > 0 {
        config.max_inodes.saturating_sub(iused)
    } else {
        let mut avail = DEFAULT_AVAIL_INODES;
        while iused.saturating_mul(10) > (iused + avail).saturating_mul(8) {
            avail = avail.saturating_mul(2);
        }
        avail
    };
    Ok(StatFs {
        total_space,
        avail_space: total_space - used.min(total_space),
        iused,
        iavail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetaConfig;
    use slicefs_kv::{KvEngine, ReadWriteTransaction};
    use slicefs_kv_backends::MemDbEngine;

    #[tokio::test]
    async fn test_capacity_limits() {
        let engine = MemDbEngine::new();
        let store = MetaStore::new(MetaConfig {
            capacity_bytes: 1 << 20,
            max_inodes: 10,
            ..Default::default()
        });
        let mut txn = engine.create_readwrite_transaction();
        store.update_stats(&mut txn, 4096, 3).await.unwrap();
        txn.commit().await.unwrap();

        let ro = engine.create_readonly_transaction();
        let st = stat_fs(&ro, &store).await.unwrap();
        assert_eq!(st.total_space, 1 << 20);
        assert_eq!(st.avail_space, (1 << 20) - 4096);
        assert_eq!(st.iused, 3);
        assert_eq!(st.iavail, 7);
    }

    #[tokio::test]
    async fn test_unlimited_defaults() {
        let engine = MemDbEngine::new();
        let store = MetaStore::new(MetaConfig::default());
        let ro = engine.create_readonly_transaction();
        let st = stat_fs(&ro, &store).await.unwrap();
        assert_eq!(st.total_space, DEFAULT_TOTAL_SPACE);
        assert_eq!(st.avail_space, DEFAULT_TOTAL_SPACE);
        assert_eq!(st.iavail, DEFAULT_AVAIL_INODES);
    }
}
