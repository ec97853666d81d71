//! slicefs-meta: metadata engine of a POSIX filesystem over a transactional
//! key-value store.
//!
//! File content lives in an external object store; this crate keeps the
//! namespace, file layouts and locks. Layout:
//! - [`ops`] - namespace, attribute, chunk and xattr operations, each running
//!   inside one store transaction
//! - [`chunk`] - per-chunk slice histories and the read plan built from them
//! - [`lock`] - whole-file and byte-range locks plus in-process waiters
//! - [`event`] - post-commit notifications (`CHUNK_DEL`, `COMPACT_CHUNK`)
//! - [`reclaim`] - deferred release of deleted file content
//! - [`service::MetaEngine`] - the [`Meta`] implementation wiring the above
//!   together with transaction retries

pub mod background;
pub mod chunk;
pub mod config;
pub mod context;
pub mod counters;
pub mod dir_entry;
pub mod event;
pub mod inode;
pub mod key_prefix;
pub mod lock;
pub mod meta_store;
pub mod ops;
pub mod reclaim;
pub mod retry;
pub mod service;
pub mod types;
pub mod xattr;


pub use background::BackgroundRunner;
pub use config::{ConfigError, MetaConfig};
pub use context::Context;
pub use event::{EventDispatcher, Message, MsgCallback, CHUNK_DEL, COMPACT_CHUNK};
pub use meta_store::MetaStore;
pub use service::{Meta, MetaEngine};
pub use types::{Attr, Entry, Ino, InodeType, LockInfo, Slice, StatFs, ROOT_INODE};
