//! Delivers a real `SIGTERM` to the test process.
//!
//! Kept in its own test binary: the signal goes to the whole process.

use std::time::Duration;

use jetkit_core::daemon::{Detached, Foreground};
use jetkit_core::supervisor::{EXIT_OK, Phase};
use jetkit_core::Supervisor;
use jetkit_test_utils::config::TestConfigBuilder;
use nix::sys::signal::{Signal, raise};
use pretty_assertions::assert_eq;

#[test_log::test(tokio::test)]
async fn test_sigterm_shuts_down_and_removes_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = TestConfigBuilder::new().work_dir(dir.path()).build();
    let supervisor = Supervisor::new(config).without_listener();

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

    // The watcher registers during startup; keep signalling until it reacts.
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
    .expect("SIGTERM did not stop the supervisor");

    assert_eq!(status, EXIT_OK);
    assert_eq!(supervisor.phase(), Phase::Exited);
    assert!(!dir.path().join("pid").exists());

    // Further signals after shutdown are absorbed.
    raise(Signal::SIGTERM).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
}
