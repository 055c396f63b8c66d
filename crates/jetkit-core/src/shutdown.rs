//! Shutdown coordination across registered workers.
//!
//! Workers are registered (and started) during the running phase. The first
//! shutdown request flips the coordinator into draining mode under the same
//! lock that guards registration, broadcasts a stop to every worker, and only
//! then begins waiting for them. Later requests are no-ops; late
//! registrations are refused.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::CoreError;
use crate::worker::{Worker, WorkerFault};

#[derive(Default)]
struct Registry {
    shutting_down: bool,
    workers: Vec<Worker>,
}

struct Inner {
    registry: Mutex<Registry>,
    faults: Mutex<Vec<WorkerFault>>,
    requested_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
}

/// Tracks running workers and stops all of them exactly once.
///
/// Cloning yields another handle to the same coordinator.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("shutting_down", &self.is_shutting_down())
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl ShutdownCoordinator {
    /// Create a coordinator with no workers.
    pub fn new() -> Self {
        let (requested_tx, _) = watch::channel(false);
        let (done_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                faults: Mutex::new(Vec::new()),
                requested_tx,
                done_tx,
            }),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start `worker` and track it until shutdown.
    ///
    /// Fails with [`CoreError::AlreadyShuttingDown`] once shutdown has begun;
    /// the worker is then dropped without ever being started.
    pub fn register(&self, mut worker: Worker) -> Result<(), CoreError> {
        let mut registry = self.registry();
        if registry.shutting_down {
            warn!(worker = %worker.name(), "Refusing registration during shutdown");
            return Err(CoreError::AlreadyShuttingDown(worker.name().to_string()));
        }

        let coordinator = self.clone();
        worker.start_supervised(Box::new(move |fault| coordinator.report_fault(fault)));
        info!(worker = %worker.name(), "Worker registered");
        registry.workers.push(worker);
        Ok(())
    }

    /// Begin shutdown without waiting for it to finish.
    ///
    /// Returns `true` for the call that actually started the shutdown and
    /// `false` for every later one. Must be called inside a tokio runtime.
    pub fn request_shutdown(&self) -> bool {
        let workers = {
            let mut registry = self.registry();
            if registry.shutting_down {
                return false;
            }
            registry.shutting_down = true;
            std::mem::take(&mut registry.workers)
        };

        info!(workers = workers.len(), "Shutdown requested, stopping workers");
        self.inner.requested_tx.send_replace(true);
        for worker in &workers {
            worker.request_stop();
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            for mut worker in workers {
                worker.stopped().await;
                debug!(worker = %worker.name(), "Worker confirmed stopped");
            }
            inner.done_tx.send_replace(true);
            info!("All workers stopped");
        });
        true
    }

    /// Stop every registered worker and wait until all of them have
    /// completed. Safe to call any number of times from any number of
    /// tasks; each caller returns only after shutdown has completed.
    ///
    /// There is no timeout. A worker whose release hangs blocks this call.
    pub async fn trigger_shutdown(&self) {
        self.request_shutdown();
        self.wait().await;
    }

    /// Wait until a shutdown has been requested, without waiting for workers.
    pub async fn requested(&self) {
        let mut requested_rx = self.inner.requested_tx.subscribe();
        let _ = requested_rx.wait_for(|requested| *requested).await;
    }

    /// Wait until a shutdown has been requested and every worker has stopped.
    pub async fn wait(&self) {
        let mut done_rx = self.inner.done_tx.subscribe();
        let _ = done_rx.wait_for(|done| *done).await;
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.registry().shutting_down
    }

    /// Whether shutdown has completed.
    pub fn is_complete(&self) -> bool {
        *self.inner.done_tx.borrow()
    }

    /// Number of workers currently registered and not yet handed to shutdown.
    pub fn worker_count(&self) -> usize {
        self.registry().workers.len()
    }

    /// Steady-state failures reported by workers so far.
    pub fn faults(&self) -> Vec<WorkerFault> {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn report_fault(&self, fault: WorkerFault) {
        warn!(worker = %fault.worker, error = %fault.error, "Worker fault, shutting down");
        self.inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fault);
        self.request_shutdown();
    }
}
