//! Log forwarders that record instead of running an executable.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use jetkit_core::forward::{ForwardError, LogForwarder};
use jetkit_core::BoxFuture;
use tokio::sync::Notify;

#[derive(Default)]
struct Shared {
    messages: Mutex<Vec<String>>,
    received: Notify,
}

/// Records every forwarded message.
///
/// Clones share the same record, so a test can hand one clone to the bridge
/// and inspect the other.
#[derive(Clone, Default)]
pub struct RecordingForwarder {
    shared: Arc<Shared>,
    delay: Duration,
    fail: bool,
}

impl RecordingForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `delay` to forward each message.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every forward after recording it, like a logger exiting non-zero.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Messages forwarded so far, in order.
    pub fn messages(&self) -> Vec<String> {
        self.shared
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait until at least `count` messages have been recorded.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let received = self.shared.received.notified();
            if self.messages().len() >= count {
                return;
            }
            received.await;
        }
    }
}

impl LogForwarder for RecordingForwarder {
    fn forward<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), ForwardError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.shared
                .messages
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(text.to_string());
            self.shared.received.notify_waiters();

            if self.fail {
                return Err(ForwardError::Failed {
                    program: "recording-forwarder".to_string(),
                    code: 1,
                    stderr: "configured to fail".to_string(),
                });
            }
            Ok(())
        })
    }
}
