//! Per-request caller identity and cancellation.

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Identity of the caller of one metadata request.
///
/// Cancelling the context interrupts a blocked lock wait; other operations
/// run to completion.
#[derive(Debug, Clone)]
pub struct Context {
    pub uid: u32,
    pub gid: u32,
    pub gids: Vec<u32>,
    pub pid: u32,
    cancel: CancellationToken,
}

impl Context {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid,
            gid,
            gids: Vec::new(),
            pid: 0,
            cancel: CancellationToken::new(),
        }
    }

    pub fn root() -> Self {
        Self::new(0, 0)
    }

    pub fn with_gids(mut self, gids: Vec<u32>) -> Self {
        self.gids = gids;
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }

    /// Whether `gid` is the primary or a supplementary group of the caller.
    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.gids.contains(&gid)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups() {
        let ctx = Context::new(1000, 100).with_gids(vec![200, 300]);
        assert!(ctx.in_group(100));
        assert!(ctx.in_group(300));
        assert!(!ctx.in_group(0));
        assert!(!ctx.is_root());
        assert!(Context::root().is_root());
    }

    #[tokio::test]
    async fn test_clones_share_cancellation() {
        let ctx = Context::new(1, 1).with_pid(42);
        let other = ctx.clone();
        assert!(!other.is_cancelled());
        ctx.cancel();
        other.cancelled().await;
        assert!(other.is_cancelled());
        assert_eq!(other.pid, 42);
    }
}
