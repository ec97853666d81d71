//! State shared by the operations that run inside store transactions.
//!
//! Operations in [`crate::ops`] are free functions over a
//! `&mut dyn ReadWriteTransaction`, the [`MetaStore`] and a [`PostCommit`]
//! collecting the work to do once the transaction committed.

use dashmap::DashMap;
use slicefs_kv::{ReadOnlyTransaction, ReadWriteTransaction};
use slicefs_types::{make_error_msg, MetaCode, Result, SessionId};

use crate::config::MetaConfig;
use crate::counters::{self, Counter};
use crate::event::Message;
use crate::types::{align_block, Attr, Ino, InodeType, Timespec, BLOCK_SIZE};

/// Side effects of a committed transaction.
#[derive(Debug, Default)]
pub struct PostCommit {
    /// Notifications for external collaborators.
    pub messages: Vec<Message>,
    /// Inodes whose content awaits reclamation.
    pub reclaim: Vec<Ino>,
    /// Inodes whose lock waiters should re-check.
    pub wake: Vec<Ino>,
}

impl PostCommit {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.reclaim.is_empty() && self.wake.is_empty()
    }
}

pub struct MetaStore {
    config: MetaConfig,
    sid: SessionId,
    /// Open handles per inode held through this engine.
    open_files: DashMap<Ino, u32>,
}

impl MetaStore {
    pub fn new(config: MetaConfig) -> Self {
        Self {
            config,
            sid: SessionId(rand::random::<u64>()),
            open_files: DashMap::new(),
        }
    }

    pub fn config(&self) -> &MetaConfig {
        &self.config
    }

    pub fn sid(&self) -> SessionId {
        self.sid
    }

    pub fn now(&self) -> Timespec {
        Timespec::now()
    }

    pub fn is_open(&self, ino: Ino) -> bool {
        self.open_files.get(&ino).is_some_and(|n| *n > 0)
    }

    pub(crate) fn add_open(&self, ino: Ino) {
        *self.open_files.entry(ino).or_insert(0) += 1;
    }

    /// Drops one handle; true when it was the last one.
    pub(crate) fn release_open(&self, ino: Ino) -> bool {
        let last = match self.open_files.get_mut(&ino) {
            Some(mut n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
            None => return false,
        };
        if last {
            self.open_files.remove_if(&ino, |_, n| *n == 0);
        }
        last
    }

    /// Rejects the creation of one more inode charging `space` bytes when
    /// either configured limit would be exceeded. Counter reads do not join
    /// the read set, so concurrent creators can overshoot by a few inodes.
    pub async fn check_quota<T: ReadOnlyTransaction + ?Sized>(
        &self,
        txn: &T,
        space: i64,
        inodes: i64,
    ) -> Result<()> {
        if self.config.max_inodes > 0 && inodes > 0 {
            let used = counters::snapshot_read(txn, Counter::TotalInodes).await?;
            if used + inodes > self.config.max_inodes as i64 {
                return make_error_msg(MetaCode::NO_SPACE, format!("{} inodes in use", used));
            }
        }
        if self.config.capacity_bytes > 0 && space > 0 {
            let used = counters::snapshot_read(txn, Counter::UsedSpace).await?;
            if used + space > self.config.capacity_bytes as i64 {
                return make_error_msg(MetaCode::NO_SPACE, format!("{} bytes in use", used));
            }
        }
        Ok(())
    }

    pub async fn update_stats(
        &self,
        txn: &mut dyn ReadWriteTransaction,
        space: i64,
        inodes: i64,
    ) -> Result<()> {
        counters::add(txn, Counter::UsedSpace, space).await?;
        counters::add(txn, Counter::TotalInodes, inodes).await
    }
}

/// Bytes charged against the capacity for an inode with these attributes.
pub fn space_of(attr: &Attr) -> i64 {
    match attr.typ {
        InodeType::File | InodeType::Symlink => align_block(attr.length).max(BLOCK_SIZE) as i64,
        _ => BLOCK_SIZE as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slicefs_kv::KvEngine;
    use slicefs_kv_backends::MemDbEngine;

    #[test]
    fn test_open_counts() {
        let store = MetaStore::new(MetaConfig::default());
        assert!(!store.is_open(5));
        store.add_open(5);
        store.add_open(5);
        assert!(!store.release_open(5));
        assert!(store.is_open(5));
        assert!(store.release_open(5));
        assert!(!store.is_open(5));
        assert!(!store.release_open(5));
    }

    #[test]
    fn test_space_of() {
        let file = Attr {
            typ: InodeType::File,
            length: 5000,
            ..Default::default()
        };
        assert_eq!(space_of(&file), 8192);
        let empty = Attr::default();
        assert_eq!(space_of(&empty), 4096);
        let dir = Attr {
            typ: InodeType::Directory,
            length: 1 << 20,
            ..Default::default()
        };
        assert_eq!(space_of(&dir), 4096);
    }

    #[tokio::test]
    async fn test_quota() {
        let engine = MemDbEngine::new();
        let store = MetaStore::new(MetaConfig {
            max_inodes: 2,
            capacity_bytes: 8192,
            ..Default::default()
        });
        let mut txn = engine.create_readwrite_transaction();
        store.update_stats(&mut txn, 4096, 2).await.unwrap();
        txn.commit().await.unwrap();

        let ro = engine.create_readonly_transaction();
        let err = store.check_quota(&ro, 0, 1).await.unwrap_err();
        assert_eq!(err.code(), MetaCode::NO_SPACE);
        assert!(store.check_quota(&ro, 4096, 0).await.is_ok());
        let err = store.check_quota(&ro, 4097, 0).await.unwrap_err();
        assert_eq!(err.code(), MetaCode::NO_SPACE);
    }
}
