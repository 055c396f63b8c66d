//! Monotonic identifier allocation through a single owning task.
//!
//! The counter lives inside one tokio task. Callers never touch it: each
//! [`SequenceAllocator::next`] sends a request carrying a reply channel and
//! waits for the answer. Requests are served strictly one at a time, so the
//! values form a single total order across all callers.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::CoreError;

/// Seed of the counter; the first value handed out is `DEFAULT_SEED + 1`.
pub const DEFAULT_SEED: u64 = 12_345_678;

/// Request queue depth in front of the owning task.
const QUEUE_DEPTH: usize = 64;

enum Command {
    Next(oneshot::Sender<u64>),
    Stop,
}

/// Handle to a running allocator. Cheap to clone; every clone talks to the
/// same owning task.
#[derive(Debug, Clone)]
pub struct SequenceAllocator {
    command_tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Next(_) => f.write_str("Next"),
            Command::Stop => f.write_str("Stop"),
        }
    }
}

impl SequenceAllocator {
    /// Spawn the owning task with [`DEFAULT_SEED`]. Must be called inside a
    /// tokio runtime.
    pub fn spawn() -> Self {
        Self::spawn_with_seed(DEFAULT_SEED)
    }

    /// Spawn the owning task with the given seed.
    pub fn spawn_with_seed(seed: u64) -> Self {
        let (command_tx, command_rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(own_counter(seed, command_rx));
        Self { command_tx }
    }

    /// Allocate the next value.
    ///
    /// Fails with [`CoreError::ResourceUnavailable`] once the owning task has
    /// stopped, including requests still queued when it stopped.
    pub async fn next(&self) -> Result<u64, CoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Next(reply_tx))
            .await
            .map_err(|_| CoreError::ResourceUnavailable("sequence allocator"))?;
        reply_rx
            .await
            .map_err(|_| CoreError::ResourceUnavailable("sequence allocator"))
    }

    /// Ask the owning task to exit. Requests queued behind the stop fail.
    pub async fn stop(&self) {
        let _ = self.command_tx.send(Command::Stop).await;
    }

    /// Whether the owning task is gone.
    pub fn is_stopped(&self) -> bool {
        self.command_tx.is_closed()
    }
}

async fn own_counter(seed: u64, mut command_rx: mpsc::Receiver<Command>) {
    let mut counter = seed;
    debug!(seed, "Sequence allocator started");

    while let Some(cmd) = command_rx.recv().await {
        match cmd {
            Command::Next(reply) => {
                let Some(value) = counter.checked_add(1) else {
                    warn!(counter, "Sequence allocator exhausted");
                    break;
                };
                counter = value;
                // A caller that gave up still consumes its value.
                let _ = reply.send(value);
            }
            Command::Stop => break,
        }
    }

    // Queued requests are dropped with the receiver and their callers see
    // ResourceUnavailable.
    command_rx.close();
    debug!(last = counter, "Sequence allocator stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_first_value_follows_seed() {
        let allocator = SequenceAllocator::spawn();
        assert_eq!(allocator.next().await.unwrap(), DEFAULT_SEED + 1);
        assert_eq!(allocator.next().await.unwrap(), DEFAULT_SEED + 2);
    }

    #[tokio::test]
    async fn test_custom_seed() {
        let allocator = SequenceAllocator::spawn_with_seed(0);
        assert_eq!(allocator.next().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_cover_contiguous_range() {
        let allocator = SequenceAllocator::spawn();

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let allocator = allocator.clone();
            tasks.push(tokio::spawn(async move {
                let mut seen = Vec::with_capacity(100);
                for _ in 0..100 {
                    seen.push(allocator.next().await.unwrap());
                }
                seen
            }));
        }

        let mut all = BTreeSet::new();
        for task in tasks {
            let seen = task.await.unwrap();
            // Each caller observes a strictly increasing sequence.
            assert!(seen.windows(2).all(|w| w[0] < w[1]));
            for value in seen {
                assert!(all.insert(value), "value {value} handed out twice");
            }
        }

        let expected: BTreeSet<u64> = (12_345_679..=12_346_678).collect();
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn test_next_after_stop_is_unavailable() {
        let allocator = SequenceAllocator::spawn();
        allocator.next().await.unwrap();
        allocator.stop().await;

        let err = allocator.next().await.unwrap_err();
        assert_eq!(err, CoreError::ResourceUnavailable("sequence allocator"));
        assert!(allocator.is_stopped());
    }

    #[tokio::test]
    async fn test_exhausted_counter_stops_owner() {
        let allocator = SequenceAllocator::spawn_with_seed(u64::MAX - 1);
        assert_eq!(allocator.next().await.unwrap(), u64::MAX);
        assert!(allocator.next().await.is_err());
    }
}
