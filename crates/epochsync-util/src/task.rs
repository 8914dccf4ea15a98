//! Cancellable background loops
//!
//! Every periodic loop in epochsync (clock auto-sync, epoch tick) runs as a
//! tokio task owned by a [`LoopHandle`]. Cancelling the handle signals the
//! loop through a [`ShutdownSignal`] and aborts the task, so no timer outlives
//! its owner. Cancellation is idempotent and also happens on drop.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{EpochSyncError, Result};

/// Receiving side of a loop's shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    /// Resolves once the owning handle has been cancelled or dropped
    pub async fn cancelled(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Owning handle for a spawned periodic loop
#[derive(Debug)]
pub struct LoopHandle {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LoopHandle {
    /// Spawn `body` on the current tokio runtime.
    ///
    /// Fails with [`EpochSyncError::NoRuntime`] when called outside a runtime.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Result<Self>
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| EpochSyncError::NoRuntime(name))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = runtime.spawn(body(ShutdownSignal(shutdown_rx)));

        debug!(loop_name = name, "Loop started");

        Ok(Self {
            name,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the loop. Calling this more than once is a no-op.
    pub fn cancel(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }

        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        debug!(loop_name = self.name, "Loop cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Whether the underlying task has stopped, for any reason
    pub fn is_finished(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    async fn count_ticks(counter: Arc<AtomicU32>, mut shutdown: ShutdownSignal) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loop_runs_until_cancelled() {
        let counter = Arc::new(AtomicU32::new(0));
        let handle = LoopHandle::spawn("test", |s| count_ticks(counter.clone(), s)).unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let seen = counter.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected at least 3 ticks, got {}", seen);

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
        assert!(handle.is_cancelled());
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let counter = Arc::new(AtomicU32::new(0));
        let handle = LoopHandle::spawn("test", |s| count_ticks(counter, s)).unwrap();

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_stops_the_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let handle = LoopHandle::spawn("test", |s| count_ticks(counter.clone(), s)).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        drop(handle);

        let seen = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn spawn_outside_runtime_fails() {
        let result = LoopHandle::spawn("orphan", |_| async {});
        assert!(matches!(result, Err(EpochSyncError::NoRuntime("orphan"))));
    }
}
