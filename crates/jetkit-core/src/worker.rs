//! Worker abstraction for long-running background activities.
//!
//! A [`Worker`] owns one [`Activity`] and drives it on its own tokio task:
//! `run` until the [`StopListener`] fires, then `release` the external
//! resource, then publish [`WorkerState::Stopped`]. The handle exposes the
//! uniform `start` / `request_stop` / `stopped` contract the
//! [`ShutdownCoordinator`](crate::ShutdownCoordinator) relies on.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{BoxFuture, CoreError};
use crate::bus::BusError;
use crate::forward::ForwardError;

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, not yet started.
    Pending,
    /// Steady-state activity in progress.
    Running,
    /// Stop requested (or activity finished); resource not yet released.
    Stopping,
    /// Resource released; completion reported.
    Stopped,
}

/// Errors an activity can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ActivityError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A steady-state activity failure, reported to whoever supervises the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFault {
    pub worker: String,
    pub error: String,
}

/// Callback invoked once if the activity fails.
pub(crate) type FaultHook = Box<dyn FnOnce(WorkerFault) + Send>;

/// What a worker runs.
///
/// `run` must await its primary input and [`StopListener::stopped`] together
/// (a `tokio::select!`), so that neither starves the other. A unit of work
/// that has been picked up runs to completion before the loop looks at the
/// stop request again.
pub trait Activity: Send + 'static {
    /// Perform the steady-state activity until `stop` fires.
    fn run<'a>(&'a mut self, stop: &'a mut StopListener)
    -> BoxFuture<'a, Result<(), ActivityError>>;

    /// Release the external resource held while running.
    fn release(&mut self) -> BoxFuture<'_, Result<(), ActivityError>>;
}

/// The receiving side of a worker's stop request.
#[derive(Debug, Clone)]
pub struct StopListener {
    rx: watch::Receiver<bool>,
}

impl StopListener {
    #[cfg(test)]
    pub(crate) fn from_receiver(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Resolve once a stop has been requested.
    ///
    /// Also resolves if the worker handle has been dropped, since nobody is
    /// left to request the stop.
    pub async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Handle to a background activity.
pub struct Worker {
    name: String,
    activity: Option<Box<dyn Activity>>,
    stop_tx: watch::Sender<bool>,
    state_tx: Arc<watch::Sender<WorkerState>>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Worker {
    /// Wrap an activity. Nothing runs until [`start`](Self::start).
    pub fn new(name: impl Into<String>, activity: impl Activity) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let (state_tx, _) = watch::channel(WorkerState::Pending);
        Self {
            name: name.into(),
            activity: Some(Box::new(activity)),
            stop_tx,
            state_tx: Arc::new(state_tx),
            task: None,
        }
    }

    /// The worker's diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        *self.state_tx.borrow()
    }

    /// Subscribe to lifecycle changes.
    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    /// Spawn the activity on its own task. Starting twice is a no-op.
    pub fn start(&mut self) {
        self.spawn(None);
    }

    /// Spawn the activity and report a steady-state failure through `on_fault`.
    pub(crate) fn start_supervised(&mut self, on_fault: FaultHook) {
        self.spawn(Some(on_fault));
    }

    fn spawn(&mut self, on_fault: Option<FaultHook>) {
        let Some(activity) = self.activity.take() else {
            debug!(worker = %self.name, "Worker already started");
            return;
        };

        let stop = StopListener {
            rx: self.stop_tx.subscribe(),
        };
        // A stop requested before start still wins.
        self.state_tx.send_if_modified(|state| {
            if *state == WorkerState::Pending {
                *state = WorkerState::Running;
                true
            } else {
                false
            }
        });

        self.task = Some(tokio::spawn(drive(
            self.name.clone(),
            activity,
            stop,
            Arc::clone(&self.state_tx),
            on_fault,
        )));
    }

    /// Ask the activity to stop. Idempotent.
    pub fn request_stop(&self) {
        let first = self.stop_tx.send_if_modified(|stop| {
            if *stop {
                false
            } else {
                *stop = true;
                true
            }
        });
        if !first {
            return;
        }

        self.state_tx.send_if_modified(|state| match state {
            WorkerState::Running => {
                *state = WorkerState::Stopping;
                true
            }
            WorkerState::Pending => {
                *state = WorkerState::Stopped;
                true
            }
            WorkerState::Stopping | WorkerState::Stopped => false,
        });
        debug!(worker = %self.name, "Stop requested");
    }

    /// Wait until the worker has released its resource and reported completion.
    ///
    /// Returns immediately for a worker that was never started. There is no
    /// timeout: a release that hangs blocks the caller.
    pub async fn stopped(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            error!(worker = %self.name, error = %e, "Worker task aborted");
            self.state_tx.send_replace(WorkerState::Stopped);
        }
    }
}

async fn drive(
    name: String,
    mut activity: Box<dyn Activity>,
    mut stop: StopListener,
    state: Arc<watch::Sender<WorkerState>>,
    on_fault: Option<FaultHook>,
) {
    info!(worker = %name, "Worker running");

    if let Err(e) = activity.run(&mut stop).await {
        error!(worker = %name, error = %e, "Worker failed");
        if let Some(report) = on_fault {
            report(WorkerFault {
                worker: name.clone(),
                error: e.to_string(),
            });
        }
    }

    // The resource is only released once a stop has been requested.
    if !stop.is_stopped() {
        debug!(worker = %name, "Activity returned early, holding resource until stop");
        stop.stopped().await;
    }
    state.send_replace(WorkerState::Stopping);

    if let Err(e) = activity.release().await {
        warn!(worker = %name, error = %e, "Releasing worker resource failed");
    }

    state.send_replace(WorkerState::Stopped);
    info!(worker = %name, "Worker stopped");
}
