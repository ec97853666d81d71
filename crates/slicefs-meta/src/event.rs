//! Post-commit notifications to external collaborators.
//!
//! Handlers are registered during setup; [`EventDispatcher::freeze`] closes
//! registration and from then on dispatch reads the handler table without
//! locking. Dispatch happens only after the transaction that produced the
//! message committed.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;
use slicefs_types::{make_error_msg, MetaCode, Result, Status, StatusCode};

use crate::types::Ino;

/// Content object `chunkid` is no longer referenced and may be deleted.
pub const CHUNK_DEL: u32 = 1000;
/// The slice history of a chunk is long enough to be worth compacting.
pub const COMPACT_CHUNK: u32 = 1001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    DeleteSlice { chunkid: u64, clen: u32 },
    CompactChunk { inode: Ino, indx: u32 },
}

impl Message {
    pub fn mtype(&self) -> u32 {
        match self {
            Message::DeleteSlice { .. } => CHUNK_DEL,
            Message::CompactChunk { .. } => COMPACT_CHUNK,
        }
    }
}

pub type MsgCallback = Box<dyn Fn(&Message) -> Result<()> + Send + Sync>;

type Handlers = HashMap<u32, Vec<MsgCallback>>;

#[derive(Default)]
pub struct EventDispatcher {
    pending: Mutex<Option<Handlers>>,
    frozen: OnceLock<Handlers>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Some(HashMap::new())),
            frozen: OnceLock::new(),
        }
    }

    pub fn on_msg(&self, mtype: u32, cb: MsgCallback) -> Result<()> {
        let mut pending = self.pending.lock();
        match pending.as_mut() {
            Some(handlers) => {
                handlers.entry(mtype).or_default().push(cb);
                Ok(())
            }
            None => make_error_msg(
                StatusCode::INVALID_ARG,
                format!("handler for message {} registered after setup", mtype),
            ),
        }
    }

    /// Closes registration. Idempotent.
    pub fn freeze(&self) {
        self.frozen
            .get_or_init(|| self.pending.lock().take().unwrap_or_default());
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get().is_some()
    }

    /// Runs every handler of `msg`'s type. All handlers run even if one
    /// fails; the first failure is returned as `NotifyFailed`.
    pub fn dispatch(&self, msg: &Message) -> Result<()> {
        self.freeze();
        let Some(handlers) = self.frozen.get().and_then(|h| h.get(&msg.mtype())) else {
            return Ok(());
        };
        let mut first_err: Option<Status> = None;
        for handler in handlers {
            if let Err(e) = handler(msg) {
                tracing::warn!(?msg, error = %e, "event: handler failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => make_error_msg(MetaCode::NOTIFY_FAILED, format!("{:?}: {}", msg, e)),
            None => Ok(()),
        }
    }

    /// Dispatches `messages` in order and reports the first failure after
    /// attempting all of them.
    pub fn dispatch_all(&self, messages: &[Message]) -> Result<()> {
        let mut result = Ok(());
        for msg in messages {
            if let Err(e) = self.dispatch(msg) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_dispatch_by_type() {
        let events = EventDispatcher::new();
        let deleted = Arc::new(AtomicU64::new(0));
        let d = deleted.clone();
        events
            .on_msg(
                CHUNK_DEL,
                Box::new(move |msg| {
                    if let Message::DeleteSlice { chunkid, .. } = msg {
                        d.fetch_add(*chunkid, Ordering::SeqCst);
                    }
                    Ok(())
                }),
            )
            .unwrap();
        events.freeze();

        events
            .dispatch(&Message::DeleteSlice { chunkid: 5, clen: 1 })
            .unwrap();
        events
            .dispatch(&Message::CompactChunk { inode: 2, indx: 0 })
            .unwrap();
        assert_eq!(deleted.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_registration_closes() {
        let events = EventDispatcher::new();
        events.on_msg(CHUNK_DEL, Box::new(|_| Ok(()))).unwrap();
        assert!(!events.is_frozen());
        events
            .dispatch(&Message::DeleteSlice { chunkid: 1, clen: 1 })
            .unwrap();
        assert!(events.is_frozen());
        let err = events.on_msg(COMPACT_CHUNK, Box::new(|_| Ok(()))).unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_ARG);
    }

    #[test]
    fn test_failure_reported_after_all_handlers_run() {
        let events = EventDispatcher::new();
        let calls = Arc::new(AtomicU64::new(0));
        let c1 = calls.clone();
        let c2 = calls.clone();
        events
            .on_msg(
                CHUNK_DEL,
                Box::new(move |_| {
                    c1.fetch_add(1, Ordering::SeqCst);
                    make_error_msg(StatusCode::IO_ERROR, "object store down")
                }),
            )
            .unwrap();
        events
            .on_msg(
                CHUNK_DEL,
                Box::new(move |_| {
                    c2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();

        let msgs = [
            Message::DeleteSlice { chunkid: 1, clen: 1 },
            Message::DeleteSlice { chunkid: 2, clen: 1 },
        ];
        let err = events.dispatch_all(&msgs).unwrap_err();
        assert_eq!(err.code(), MetaCode::NOTIFY_FAILED);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
