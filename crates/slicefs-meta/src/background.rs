//! Background tasks sharing one shutdown signal.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct BackgroundRunner {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundRunner {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn spawn<F, Fut>(&mut self, name: &'static str, f: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rx = self.shutdown_tx.subscribe();
        self.handles.push((name, tokio::spawn(f(rx))));
    }

    /// Runs `f` every `interval` until shutdown. The first run happens
    /// immediately.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, interval: Duration, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.shutdown_tx.subscribe();
        self.handles.push((
            name,
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => f().await,
                        _ = rx.changed() => break,
                    }
                }
            }),
        ));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(task = name, error = %e, "background: task ended abnormally");
            }
        }
        tracing::info!("background: all tasks stopped");
    }
}

impl Default for BackgroundRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_periodic_runs_until_shutdown() {
        let mut runner = BackgroundRunner::new();
        let runs = Arc::new(AtomicU32::new(0));
        let r = runs.clone();
        runner.spawn_periodic("count", Duration::from_millis(5), move || {
            let r = r.clone();
            async move {
                r.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        runner.shutdown().await;
        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_spawned_task_sees_signal() {
        let mut runner = BackgroundRunner::new();
        let stopped = Arc::new(AtomicU32::new(0));
        let s = stopped.clone();
        runner.spawn("wait", move |mut rx| async move {
            let _ = rx.changed().await;
            s.store(1, Ordering::SeqCst);
        });
        assert_eq!(runner.len(), 1);
        runner.shutdown().await;
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }
}
