//! Periodic rotation of the daemon's log file, run as a worker.
//!
//! Each tick renames the current log aside and reopens a fresh one. The
//! first tick is skipped so a freshly started bridge keeps its log.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::BoxFuture;
use crate::logging::RotatingLog;
use crate::worker::{Activity, ActivityError, StopListener};

/// Worker name used in logs and faults.
pub const ROTATION_WORKER: &str = "log-rotation";

/// Rotates the daemon log every `interval`. Stopping cancels the timer.
#[derive(Debug)]
pub struct LogRotation {
    log: RotatingLog,
    interval: Duration,
}

impl LogRotation {
    pub fn new(log: RotatingLog, interval: Duration) -> Self {
        Self { log, interval }
    }
}

impl Activity for LogRotation {
    fn run<'a>(
        &'a mut self,
        stop: &'a mut StopListener,
    ) -> BoxFuture<'a, Result<(), ActivityError>> {
        Box::pin(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop.stopped() => return Ok(()),
                    _ = ticker.tick() => {
                        self.log.rotate()?;
                        info!(path = %self.log.path().display(), "Log rotated");
                    }
                }
            }
        })
    }

    fn release(&mut self) -> BoxFuture<'_, Result<(), ActivityError>> {
        Box::pin(async { Ok(()) })
    }
}
