use crate::transaction::{ReadOnlyTransaction, ReadWriteTransaction};

/// A transactional ordered key-value store.
///
/// Every metadata operation opens exactly one read-write transaction, so a
/// backend only has to provide snapshot isolation plus conflict detection on
/// the keys and ranges the transaction declared as read.
pub trait KvEngine: Send + Sync + 'static {
    type RoTxn: ReadOnlyTransaction + 'static;
    type RwTxn: ReadWriteTransaction + 'static;

    fn create_readonly_transaction(&self) -> Self::RoTxn;
    fn create_readwrite_transaction(&self) -> Self::RwTxn;
}
