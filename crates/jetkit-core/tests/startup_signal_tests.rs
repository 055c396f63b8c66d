//! Delivers a real `SIGTERM` while the bridge is still subscribing.
//!
//! Kept in its own test binary: the signal goes to the whole process.

use std::sync::Arc;
use std::time::Duration;

use jetkit_core::bus::{BusError, MessageBus, Subscription};
use jetkit_core::daemon::{Detached, Foreground};
use jetkit_core::supervisor::{EXIT_OK, Phase};
use jetkit_core::{BoxFuture, Supervisor};
use jetkit_test_utils::config::TestConfigBuilder;
use nix::sys::signal::{Signal, raise};
use pretty_assertions::assert_eq;

/// A broker that accepts the connection but never acknowledges the subscription.
struct StalledBus;

impl MessageBus for StalledBus {
    fn subscribe<'a>(
        &'a self,
        _topic: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Subscription>, BusError>> {
        Box::pin(std::future::pending())
    }
}

#[test_log::test(tokio::test)]
async fn test_sigterm_during_subscribe_removes_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = TestConfigBuilder::new().work_dir(dir.path()).build();
    let supervisor = Supervisor::new(config).with_bus(Arc::new(StalledBus));

    let Detached::Child(pid_file) = supervisor
        .detach(&Foreground::from_config(&supervisor.config().daemon))
        .unwrap()
    else {
        panic!("foreground detach returned the parent side");
    };
    assert!(dir.path().join("pid").exists());

    // Keep the default action (terminate) from ever applying to this process.
    let _guard = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).unwrap();

    let log = supervisor.open_log().unwrap();
    let run = supervisor.run(pid_file, log);
    tokio::pin!(run);

    let status = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            tokio::select! {
                status = &mut run => break status,
                _ = tokio::time::sleep(Duration::from_millis(20)) => {
                    raise(Signal::SIGTERM).unwrap();
                }
            }
        }
    })
    .await
    .expect("SIGTERM during subscribe did not stop the supervisor");

    assert_eq!(status, EXIT_OK);
    assert_eq!(supervisor.phase(), Phase::Exited);
    assert!(!dir.path().join("pid").exists());
}
