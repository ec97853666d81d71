//! flock and POSIX record locks.
//!
//! Lock state lives in the store so that every engine sharing it sees the
//! same holders. Blocking is local: see [`waiters`].

pub mod flock;
pub mod plock;
pub mod waiters;

pub use waiters::{WaitGuard, Waiters};
