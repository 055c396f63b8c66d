//! A bridge supervisor running in a throwaway working directory.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use jetkit_config::AppConfig;
use jetkit_core::bus::MemoryBus;
use jetkit_core::daemon::{Detached, Foreground, PidFile};
use jetkit_core::logging::RotatingLog;
use jetkit_core::Supervisor;
use tempfile::TempDir;

use crate::config::TestConfigBuilder;
use crate::forward::RecordingForwarder;

/// A foreground supervisor wired to an in-process bus and a recording
/// forwarder. The working directory is deleted when this is dropped.
pub struct TestBridge {
    pub supervisor: Supervisor,
    pub bus: MemoryBus,
    pub forwarder: RecordingForwarder,
    pub log: RotatingLog,
    pid_file: Option<PidFile>,
    work_dir: TempDir,
}

impl TestBridge {
    /// Build a bridge from `builder`, with the working directory filled in.
    pub fn new(builder: TestConfigBuilder) -> Self {
        Self::with_forwarder(builder, RecordingForwarder::new())
    }

    pub fn with_forwarder(builder: TestConfigBuilder, forwarder: RecordingForwarder) -> Self {
        let work_dir = TempDir::new().expect("failed to create temp dir");
        let config: AppConfig = builder.work_dir(work_dir.path()).build();
        let bus = MemoryBus::default();

        let supervisor = Supervisor::new(config)
            .with_bus(Arc::new(bus.clone()))
            .with_forwarder(Arc::new(forwarder.clone()));

        let detacher = Foreground::from_config(&supervisor.config().daemon);
        let Detached::Child(pid_file) = supervisor
            .detach(&detacher)
            .expect("foreground detach failed")
        else {
            panic!("foreground detach returned the parent side");
        };
        let log = supervisor.open_log().expect("failed to open log");

        Self {
            supervisor,
            bus,
            forwarder,
            log,
            pid_file: Some(pid_file),
            work_dir,
        }
    }

    pub fn pid_path(&self) -> PathBuf {
        self.work_dir.path().join("pid")
    }

    pub fn log_path(&self) -> PathBuf {
        self.work_dir.path().join("log")
    }

    /// Run the supervisor until `signals` resolves and shutdown completes.
    ///
    /// # Panics
    ///
    /// If called twice.
    pub async fn run_with_signals<F>(&mut self, signals: F) -> i32
    where
        F: Future<Output = &'static str> + Send + 'static,
    {
        let pid_file = self.pid_file.take().expect("bridge already ran");
        self.supervisor
            .run_with_signals(pid_file, self.log.clone(), signals)
            .await
    }
}
