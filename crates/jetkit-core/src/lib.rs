#![deny(unsafe_code)]

//! jetkit core: the long-running MQTT bridge.
//!
//! The bridge subscribes to an MQTT topic and forwards every message to the
//! host's system log. Its moving parts are a [`SequenceAllocator`] that hands
//! out identifiers from a single owning task, [`Worker`]s wrapping each
//! background activity, a [`ShutdownCoordinator`] that stops every worker
//! exactly once, a [`SignalWatcher`] that turns `SIGINT`/`SIGTERM` into a
//! shutdown, and the [`Supervisor`] that wires them together in a detached
//! daemon.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future used by the collaborator traits
/// ([`Activity`], [`MessageBus`], [`LogForwarder`]) so they stay object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Message-bus collaborator: MQTT and in-process implementations.
pub mod bus;
/// Detaching into the background and the PID file.
pub mod daemon;
/// Forwarding received messages to the system log.
pub mod forward;
/// Worker that bridges a bus subscription into the log forwarder.
pub mod listener;
/// Rotating log file used as the daemon's tracing output.
pub mod logging;
/// Worker that rotates the log file on a fixed interval.
pub mod rotation;
/// Single-owner monotonic identifier allocation.
pub mod sequence;
/// Multi-worker supervised shutdown.
pub mod shutdown;
/// OS termination signal watcher.
pub mod signal;
/// Top-level daemon state machine.
pub mod supervisor;
/// Worker abstraction: start, stop request, completion.
pub mod worker;

pub use bus::{BusError, MessageBus, Subscription};
pub use daemon::{DaemonError, Daemonizer, Detached, Detacher, Foreground, PidFile};
pub use forward::{ForwardError, LogForwarder};
pub use sequence::SequenceAllocator;
pub use shutdown::ShutdownCoordinator;
pub use signal::SignalWatcher;
pub use supervisor::{Phase, Supervisor, SupervisorError};
pub use worker::{Activity, ActivityError, StopListener, Worker, WorkerFault, WorkerState};

/// Errors from the concurrency core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// The owning task of a resource has terminated.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(&'static str),

    /// A worker was registered after shutdown began.
    #[error("shutdown already in progress, refusing to start worker '{0}'")]
    AlreadyShuttingDown(String),
}
