//! Top-level state machine of the bridge daemon.
//!
//! ```text
//! Init -> Forking -> Parent: Exited(0)
//!                 -> Child:  Running -> ShuttingDown -> Exited(0 | 1)
//! ```
//!
//! `Init` and `Forking` are synchronous and happen before the tokio runtime
//! exists ([`Supervisor::detach`]). Everything from `Running` on happens
//! inside [`Supervisor::run`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use jetkit_config::AppConfig;

use crate::CoreError;
use crate::bus::{BusError, MessageBus, MqttBus};
use crate::daemon::{DaemonError, Detached, Detacher, PidFile};
use crate::forward::{LogForwarder, LoggerCommand};
use crate::listener::{BridgeListener, LISTENER_WORKER};
use crate::logging::RotatingLog;
use crate::rotation::{LogRotation, ROTATION_WORKER};
use crate::sequence::SequenceAllocator;
use crate::shutdown::ShutdownCoordinator;
use crate::signal::SignalWatcher;
use crate::worker::Worker;

/// Exit status of a clean shutdown.
pub const EXIT_OK: i32 = 0;
/// Exit status after a startup failure, a worker fault or an expired grace period.
pub const EXIT_FAILURE: i32 = 1;

/// Where the supervisor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Forking,
    Running,
    ShuttingDown,
    Exited,
}

/// Errors that end the running phase early.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),
}

/// Wires the bridge workers, the coordinator and the signal watcher together.
pub struct Supervisor {
    config: AppConfig,
    bus: Option<Arc<dyn MessageBus>>,
    forwarder: Option<Arc<dyn LogForwarder>>,
    listen: bool,
    phase: watch::Sender<Phase>,
}

impl Supervisor {
    pub fn new(config: AppConfig) -> Self {
        let (phase, _) = watch::channel(Phase::Init);
        Self {
            config,
            bus: None,
            forwarder: None,
            listen: true,
            phase,
        }
    }

    /// Use `bus` instead of connecting to the configured MQTT broker.
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Use `forwarder` instead of running the configured executable.
    pub fn with_forwarder(mut self, forwarder: Arc<dyn LogForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// Run without the MQTT listener worker.
    pub fn without_listener(mut self) -> Self {
        self.listen = false;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    fn enter(&self, phase: Phase) {
        self.phase.send_replace(phase);
        info!(?phase, "Supervisor phase");
    }

    /// Detach from the terminal. Call before building the tokio runtime.
    ///
    /// On [`Detached::Parent`] the caller should exit with [`EXIT_OK`].
    pub fn detach(&self, detacher: &dyn Detacher) -> Result<Detached, DaemonError> {
        self.enter(Phase::Forking);
        let detached = detacher.spawn_detached()?;
        if matches!(detached, Detached::Parent) {
            self.enter(Phase::Exited);
        }
        Ok(detached)
    }

    /// Open the daemon's log file.
    pub fn open_log(&self) -> Result<RotatingLog, DaemonError> {
        Ok(RotatingLog::open(self.config.daemon.log_path())?)
    }

    /// Run until a termination signal (or a worker fault) has shut every
    /// worker down, then remove the PID file. Returns the exit status.
    pub async fn run(&self, pid_file: PidFile, log: RotatingLog) -> i32 {
        self.run_with(pid_file, log, SignalWatcher::spawn).await
    }

    /// Like [`run`](Self::run), with `signals` standing in for the OS.
    pub async fn run_with_signals<F>(&self, pid_file: PidFile, log: RotatingLog, signals: F) -> i32
    where
        F: Future<Output = &'static str> + Send + 'static,
    {
        self.run_with(pid_file, log, |coordinator| {
            Ok(SignalWatcher::with_source(coordinator, signals))
        })
        .await
    }

    async fn run_with<W>(&self, pid_file: PidFile, log: RotatingLog, watch_signals: W) -> i32
    where
        W: FnOnce(ShutdownCoordinator) -> std::io::Result<SignalWatcher>,
    {
        self.enter(Phase::Running);
        let status = match self.serve(log, watch_signals).await {
            Ok(status) => status,
            Err(e) => {
                error!(error = %e, "Bridge failed to start");
                EXIT_FAILURE
            }
        };

        self.enter(Phase::Exited);
        if let Err(e) = pid_file.release() {
            warn!(error = %e, "Failed to remove PID file");
        }
        info!(status, "Bridge exiting");
        status
    }

    async fn serve<W>(&self, log: RotatingLog, watch_signals: W) -> Result<i32, SupervisorError>
    where
        W: FnOnce(ShutdownCoordinator) -> std::io::Result<SignalWatcher>,
    {
        let coordinator = ShutdownCoordinator::new();
        // Installed before connecting so a signal during a slow subscribe
        // still ends with the PID file removed.
        let watcher = watch_signals(coordinator.clone()).map_err(SupervisorError::Signal)?;
        let sequence = SequenceAllocator::spawn();

        if let Err(e) = self.start_workers(&coordinator, &sequence, log).await {
            watcher.close();
            coordinator.trigger_shutdown().await;
            sequence.stop().await;
            return Err(e);
        }

        coordinator.requested().await;
        self.enter(Phase::ShuttingDown);

        let drained = match self.config.bridge.shutdown_grace_secs {
            0 => {
                coordinator.wait().await;
                true
            }
            secs => tokio::time::timeout(Duration::from_secs(secs), coordinator.wait())
                .await
                .is_ok(),
        };
        watcher.close();
        sequence.stop().await;

        if !drained {
            error!(
                grace_secs = self.config.bridge.shutdown_grace_secs,
                "Workers did not stop within the grace period"
            );
            return Ok(EXIT_FAILURE);
        }

        let faults = coordinator.faults();
        for fault in &faults {
            error!(worker = %fault.worker, error = %fault.error, "Worker failed");
        }
        Ok(if faults.is_empty() { EXIT_OK } else { EXIT_FAILURE })
    }

    /// Connect the listener and register it and the rotation worker.
    ///
    /// A shutdown requested while connecting skips whatever is not yet
    /// started; the caller then drains what was registered.
    async fn start_workers(
        &self,
        coordinator: &ShutdownCoordinator,
        sequence: &SequenceAllocator,
        log: RotatingLog,
    ) -> Result<(), SupervisorError> {
        if self.listen {
            let bridge = &self.config.bridge;
            let bus = match &self.bus {
                Some(bus) => Arc::clone(bus),
                None => Arc::new(MqttBus::from_config(bridge)),
            };
            let forwarder = match &self.forwarder {
                Some(forwarder) => Arc::clone(forwarder),
                None => Arc::new(LoggerCommand::new(&self.config.forwarder)),
            };

            let connect = BridgeListener::connect(
                bus.as_ref(),
                &bridge.topic,
                forwarder,
                sequence.clone(),
                bridge.on_forward_error,
            );
            let listener = tokio::select! {
                listener = connect => listener?,
                () = coordinator.requested() => {
                    info!(topic = %bridge.topic, "Shutdown requested while subscribing");
                    return Ok(());
                }
            };
            if let Err(e) = coordinator.register(Worker::new(LISTENER_WORKER, listener)) {
                warn!(error = %e, "Listener not started");
                return Ok(());
            }
        }

        let interval = Duration::from_secs(self.config.daemon.rotate_interval_secs);
        let rotation = Worker::new(ROTATION_WORKER, LogRotation::new(log, interval));
        if let Err(e) = coordinator.register(rotation) {
            warn!(error = %e, "Log rotation not started");
            return Ok(());
        }

        info!(broker = %self.config.bridge.broker_url(), topic = %self.config.bridge.topic, "Bridge running");
        Ok(())
    }
}
