//! Exponential back-off between transaction attempts.

use std::time::Duration;

use crate::config::MetaConfig;

/// Doubles the wait after every attempt, capped at `max_wait`, and gives up
/// after `max_attempts` retries.
#[derive(Debug, Clone)]
pub struct Backoff {
    current_wait: Duration,
    max_wait: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    pub fn new(init_wait: Duration, max_wait: Duration, max_attempts: u32) -> Self {
        Self {
            current_wait: init_wait,
            max_wait,
            max_attempts,
            attempts: 0,
        }
    }

    pub fn from_config(config: &MetaConfig) -> Self {
        Self::new(
            config.retry_init_wait(),
            config.retry_max_wait(),
            config.max_retries,
        )
    }

    /// Wait before the next retry, or `None` once retries are used up.
    pub fn next_wait(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        let wait = self.current_wait;
        self.current_wait = (self.current_wait * 2).min(self.max_wait);
        Some(wait)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Runs `$body` in a fresh read-write transaction of `$engine` and commits
/// it, retrying retryable failures with `$backoff`.
///
/// Inside the body `$txn` is `&mut dyn ReadWriteTransaction` and `$out` is
/// `&mut PostCommit`. Evaluates to `Result<(T, PostCommit)>` where `T` is
/// the body's success value; exhausting the retries yields
/// `TemporarilyUnavailable`.
macro_rules! with_rw_txn {
    ($engine:expr, $backoff:expr, $op:literal, |$txn:ident, $out:ident| $body:expr) => {{
        let mut backoff: $crate::retry::Backoff = $backoff;
        loop {
            let mut txn = slicefs_kv::KvEngine::create_readwrite_transaction($engine);
            let mut post = $crate::meta_store::PostCommit::default();
            let attempt = async {
                let $txn: &mut dyn slicefs_kv::ReadWriteTransaction = &mut txn;
                let $out: &mut $crate::meta_store::PostCommit = &mut post;
                $body
            }
            .await;
            let err = match attempt {
                Ok(value) => match slicefs_kv::ReadWriteTransaction::commit(&mut txn).await {
                    Ok(()) => break Ok((value, post)),
                    Err(e) => e,
                },
                Err(e) => e,
            };
            if !err.is_retryable() {
                break Err(err);
            }
            match backoff.next_wait() {
                Some(wait) => {
                    tracing::debug!(op = $op, attempt = backoff.attempts(), error = %err, "txn: retrying");
                    tokio::time::sleep(wait).await;
                }
                None => {
                    tracing::warn!(op = $op, error = %err, "txn: retries exhausted");
                    break slicefs_types::make_error_msg(
                        slicefs_types::StatusCode::TEMPORARILY_UNAVAILABLE,
                        format!("{}: {}", $op, err),
                    );
                }
            }
        }
    }};
}

pub(crate) use with_rw_txn;

#[cfg(test)]
mod tests {
    use super::*;
    use slicefs_kv_backends::MemDbEngine;
    use slicefs_types::{make_error, MetaCode, Status, StatusCode};

    #[test]
    fn test_doubles_then_caps() {
        let mut bo = Backoff::new(Duration::from_millis(10), Duration::from_millis(35), 10);
        assert_eq!(bo.next_wait(), Some(Duration::from_millis(10)));
        assert_eq!(bo.next_wait(), Some(Duration::from_millis(20)));
        assert_eq!(bo.next_wait(), Some(Duration::from_millis(35)));
        assert_eq!(bo.next_wait(), Some(Duration::from_millis(35)));
        assert_eq!(bo.attempts(), 4);
    }

    #[test]
    fn test_gives_up() {
        let mut bo = Backoff::new(Duration::from_millis(1), Duration::from_millis(1), 2);
        assert!(bo.next_wait().is_some());
        assert!(bo.next_wait().is_some());
        assert_eq!(bo.next_wait(), None);
    }

    #[tokio::test]
    async fn test_with_rw_txn_retries_conflicts() {
        let engine = MemDbEngine::new();
        engine.inject_conflicts(2);
        let bo = Backoff::new(Duration::from_millis(1), Duration::from_millis(2), 5);
        let (value, post) = with_rw_txn!(&engine, bo, "test", |txn, out| {
            txn.set(b"k", b"v").await?;
            out.reclaim.push(9);
            Ok::<_, Status>(7u32)
        })
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(post.reclaim, vec![9]);
        assert_eq!(engine.len(), 1);
    }

    #[tokio::test]
    async fn test_with_rw_txn_gives_up() {
        let engine = MemDbEngine::new();
        engine.inject_conflicts(10);
        let bo = Backoff::new(Duration::from_millis(1), Duration::from_millis(1), 2);
        let err = with_rw_txn!(&engine, bo, "test", |txn, _out| {
            txn.set(b"k", b"v").await?;
            Ok::<_, Status>(())
        })
        .unwrap_err();
        assert_eq!(err.code(), StatusCode::TEMPORARILY_UNAVAILABLE);
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_with_rw_txn_passes_semantic_errors() {
        let engine = MemDbEngine::new();
        let bo = Backoff::new(Duration::from_millis(1), Duration::from_millis(1), 2);
        let err = with_rw_txn!(&engine, bo, "test", |txn, _out| {
            txn.set(b"k", b"v").await?;
            make_error::<()>(MetaCode::EXISTS)
        })
        .unwrap_err();
        assert_eq!(err.code(), MetaCode::EXISTS);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_from_config() {
        let cfg = MetaConfig {
            max_retries: 1,
            retry_init_wait_ms: 7,
            ..Default::default()
        };
        let mut bo = Backoff::from_config(&cfg);
        assert_eq!(bo.next_wait(), Some(Duration::from_millis(7)));
        assert_eq!(bo.next_wait(), None);
    }
}
