//! In-process registry of blocked lock requests.
//!
//! Waiters of one inode share a [`Notify`]. A releasing transaction wakes all
//! of them after commit and each re-checks conflicts on its own; holders in
//! other processes are covered by the periodic recheck of the waiting loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use slicefs_types::LockOwner;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::types::Ino;

#[derive(Default)]
pub struct Waiters {
    notifies: DashMap<Ino, Arc<Notify>>,
    interrupts: DashMap<(Ino, LockOwner), (u64, CancellationToken)>,
    next_seq: AtomicU64,
}

impl Waiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter on `ino`. `owner` is set for requests that
    /// [`Waiters::interrupt`] may cancel.
    pub fn register(&self, ino: Ino, owner: Option<LockOwner>) -> WaitGuard<'_> {
        let notify = self.notifies.entry(ino).or_default().clone();
        let interrupt = owner.map(|owner| {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            let token = CancellationToken::new();
            self.interrupts.insert((ino, owner), (seq, token.clone()));
            (owner, seq, token)
        });
        WaitGuard {
            waiters: self,
            ino,
            notify,
            interrupt,
        }
    }

    pub fn wake(&self, ino: Ino) {
        if let Some(notify) = self.notifies.get(&ino) {
            notify.notify_waiters();
        }
    }

    /// Cancels the pending interruptible request of `(ino, owner)`; false
    /// when there is none.
    pub fn interrupt(&self, ino: Ino, owner: LockOwner) -> bool {
        match self.interrupts.get(&(ino, owner)) {
            Some(entry) => {
                entry.1.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of inodes with at least one registered waiter.
    pub fn len(&self) -> usize {
        self.notifies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifies.is_empty() && self.interrupts.is_empty()
    }
}

/// Registration of one waiter; unregisters on drop.
pub struct WaitGuard<'a> {
    waiters: &'a Waiters,
    ino: Ino,
    notify: Arc<Notify>,
    interrupt: Option<(LockOwner, u64, CancellationToken)>,
}

impl WaitGuard<'_> {
    pub fn notify(&self) -> &Notify {
        &self.notify
    }

    /// Resolves once the request was interrupted; never for requests
    /// registered without an owner.
    pub async fn interrupted(&self) {
        match &self.interrupt {
            Some((_, _, token)) => token.cancelled().await,
            None => std::future::pending().await,
        }
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if let Some((owner, seq, _)) = &self.interrupt {
            self.waiters
                .interrupts
                .remove_if(&(self.ino, *owner), |_, (s, _)| s == seq);
        }
        // The map and this guard hold the last two references.
        self.waiters
            .notifies
            .remove_if(&self.ino, |_, n| Arc::strong_count(n) == 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wake_reaches_registered_waiter() {
        let waiters = Waiters::new();
        let guard = waiters.register(3, None);
        let notified = guard.notify().notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        waiters.wake(3);
        tokio::time::timeout(Duration::from_secs(1), notified)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_interrupt_only_hits_owner() {
        let waiters = Waiters::new();
        let guard = waiters.register(3, Some(LockOwner(1)));
        assert!(!waiters.interrupt(3, LockOwner(2)));
        assert!(waiters.interrupt(3, LockOwner(1)));
        tokio::time::timeout(Duration::from_secs(1), guard.interrupted())
            .await
            .unwrap();
    }

    #[test]
    fn test_drop_unregisters() {
        let waiters = Waiters::new();
        let a = waiters.register(3, Some(LockOwner(1)));
        let b = waiters.register(3, None);
        assert_eq!(waiters.len(), 1);
        drop(a);
        assert!(!waiters.interrupt(3, LockOwner(1)));
        assert_eq!(waiters.len(), 1);
        drop(b);
        assert!(waiters.is_empty());
    }
}
