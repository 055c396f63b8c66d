//! Turns the first termination signal into a coordinated shutdown.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::shutdown::ShutdownCoordinator;

/// Watches for `SIGINT` / `SIGTERM` and triggers the coordinator once.
#[derive(Debug)]
pub struct SignalWatcher {
    fired: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SignalWatcher {
    /// Register for `SIGINT` and `SIGTERM` and start watching.
    ///
    /// Registration happens before this returns, so a signal delivered right
    /// after is not missed. Must be called from within a tokio runtime.
    pub fn spawn(coordinator: ShutdownCoordinator) -> std::io::Result<Self> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let source = async move {
            tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            }
        };
        Ok(Self::with_source(coordinator, source))
    }

    /// Watch an arbitrary source that resolves with the name of the signal.
    pub fn with_source<F>(coordinator: ShutdownCoordinator, source: F) -> Self
    where
        F: Future<Output = &'static str> + Send + 'static,
    {
        let fired = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(watch(source, coordinator, Arc::clone(&fired)));
        Self { fired, task }
    }

    /// Whether a signal has been received.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Stop watching. Used when shutdown was triggered by something else.
    pub fn close(self) {
        self.task.abort();
    }
}

async fn watch<F>(source: F, coordinator: ShutdownCoordinator, fired: Arc<AtomicBool>)
where
    F: Future<Output = &'static str>,
{
    let name = source.await;
    if fired.swap(true, Ordering::SeqCst) {
        return;
    }
    info!(signal = name, "Termination signal received, shutting down");
    if !coordinator.request_shutdown() {
        debug!(signal = name, "Shutdown already in progress");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_signal_triggers_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let (tx, rx) = oneshot::channel::<()>();
        let watcher = SignalWatcher::with_source(coordinator.clone(), async move {
            let _ = rx.await;
            "SIGTERM"
        });
        assert!(!watcher.has_fired());

        tx.send(()).unwrap();
        coordinator.wait().await;
        assert!(watcher.has_fired());
        assert!(coordinator.is_complete());
    }

    #[tokio::test]
    async fn test_signal_after_shutdown_is_harmless() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger_shutdown().await;

        let watcher = SignalWatcher::with_source(coordinator.clone(), async { "SIGINT" });
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !watcher.has_fired() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(coordinator.is_complete());
    }

    #[tokio::test]
    async fn test_closed_watcher_never_triggers() {
        let coordinator = ShutdownCoordinator::new();
        let watcher = SignalWatcher::with_source(coordinator.clone(), std::future::pending());
        watcher.close();
        tokio::task::yield_now().await;
        assert!(!coordinator.is_shutting_down());
    }
}
