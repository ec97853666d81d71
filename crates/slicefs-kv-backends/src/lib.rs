//! Backends for the [`slicefs_kv::KvEngine`] capability interface.
//!
//! - **memdb** -- in-memory ordered map with optimistic conflict detection.

pub mod memdb;

pub use memdb::MemDbEngine;
