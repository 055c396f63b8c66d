//! MQTT-to-system-log bridge activity.

use std::sync::Arc;

use tracing::{info, warn};

use jetkit_config::ForwardErrorPolicy;

use crate::BoxFuture;
use crate::bus::{BusError, MessageBus, Subscription};
use crate::forward::LogForwarder;
use crate::sequence::SequenceAllocator;
use crate::worker::{Activity, ActivityError, StopListener};

/// Worker name used in logs and faults.
pub const LISTENER_WORKER: &str = "mqtt-listener";

/// Receives payloads from one subscription and forwards each to the log.
///
/// Every received message is tagged with an id from the shared
/// [`SequenceAllocator`] so it can be traced through the daemon's log.
pub struct BridgeListener {
    subscription: Box<dyn Subscription>,
    forwarder: Arc<dyn LogForwarder>,
    sequence: SequenceAllocator,
    policy: ForwardErrorPolicy,
}

impl BridgeListener {
    /// Subscribe to `topic`. A failure here aborts startup, before the
    /// listener is ever registered as a worker.
    pub async fn connect(
        bus: &dyn MessageBus,
        topic: &str,
        forwarder: Arc<dyn LogForwarder>,
        sequence: SequenceAllocator,
        policy: ForwardErrorPolicy,
    ) -> Result<Self, BusError> {
        let subscription = bus.subscribe(topic).await?;
        Ok(Self {
            subscription,
            forwarder,
            sequence,
            policy,
        })
    }

    async fn handle(&mut self, payload: Vec<u8>) -> Result<(), ActivityError> {
        let id = self.sequence.next().await?;
        let text = String::from_utf8_lossy(&payload);
        info!(id, topic = %self.subscription.topic(), message = %text, "Received message");

        match self.forwarder.forward(&text).await {
            Ok(()) => Ok(()),
            Err(e) if self.policy == ForwardErrorPolicy::Continue => {
                warn!(id, error = %e, "Forwarding failed, message dropped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Activity for BridgeListener {
    fn run<'a>(
        &'a mut self,
        stop: &'a mut StopListener,
    ) -> BoxFuture<'a, Result<(), ActivityError>> {
        Box::pin(async move {
            loop {
                tokio::select! {
                    _ = stop.stopped() => return Ok(()),
                    message = self.subscription.next_message() => {
                        let Some(payload) = message? else {
                            info!(topic = %self.subscription.topic(), "Subscription closed by broker");
                            return Ok(());
                        };
                        // Runs to completion even if a stop arrives meanwhile.
                        self.handle(payload).await?;
                    }
                }
            }
        })
    }

    fn release(&mut self) -> BoxFuture<'_, Result<(), ActivityError>> {
        Box::pin(async move {
            self.subscription.unsubscribe().await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::bus::MemoryBus;
    use crate::forward::ForwardError;
    use crate::worker::{Worker, WorkerState};
    use pretty_assertions::assert_eq;
    use tokio::sync::Notify;

    /// Records forwarded text; optionally slow, optionally failing.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        entered: Notify,
        delay: Duration,
        fail: bool,
    }

    impl LogForwarder for Recorder {
        fn forward<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), ForwardError>> {
            Box::pin(async move {
                self.entered.notify_one();
                tokio::time::sleep(self.delay).await;
                if self.fail {
                    return Err(ForwardError::Failed {
                        program: "logger".to_string(),
                        code: 1,
                        stderr: "no eventd".to_string(),
                    });
                }
                self.seen.lock().unwrap().push(text.to_string());
                Ok(())
            })
        }
    }

    async fn listener(
        bus: &MemoryBus,
        forwarder: Arc<Recorder>,
        policy: ForwardErrorPolicy,
    ) -> BridgeListener {
        BridgeListener::connect(bus, "t1", forwarder, SequenceAllocator::spawn(), policy)
            .await
            .unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn test_forwards_payload_and_unsubscribes_on_stop() {
        let bus = MemoryBus::default();
        let recorder = Arc::new(Recorder::default());
        let mut worker = Worker::new(
            LISTENER_WORKER,
            listener(&bus, Arc::clone(&recorder), ForwardErrorPolicy::Exit).await,
        );
        worker.start();

        bus.publish("t1", "hello");
        recorder.entered.notified().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        worker.request_stop();
        worker.stopped().await;

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["hello".to_string()]);
        assert_eq!(bus.unsubscribe_count(), 1);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_message_in_flight_completes_before_stopped() {
        let bus = MemoryBus::default();
        let recorder = Arc::new(Recorder {
            delay: Duration::from_millis(100),
            ..Recorder::default()
        });
        let mut worker = Worker::new(
            LISTENER_WORKER,
            listener(&bus, Arc::clone(&recorder), ForwardErrorPolicy::Exit).await,
        );
        worker.start();

        bus.publish("t1", "slow one");
        recorder.entered.notified().await;
        // Stop lands while the forward is still sleeping.
        worker.request_stop();
        assert!(recorder.seen.lock().unwrap().is_empty());

        worker.stopped().await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["slow one".to_string()]);
        assert_eq!(bus.open_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_forward_failure_is_fatal_by_default() {
        let bus = MemoryBus::default();
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let mut activity = listener(&bus, recorder, ForwardErrorPolicy::Exit).await;
        let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let mut stop = StopListener::from_receiver(stop_rx);

        bus.publish("t1", "hello");
        let err = activity.run(&mut stop).await.unwrap_err();
        assert!(matches!(err, ActivityError::Forward(_)));
    }

    #[tokio::test]
    async fn test_forward_failure_continues_when_configured() {
        let bus = MemoryBus::default();
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let mut worker = Worker::new(
            LISTENER_WORKER,
            listener(&bus, Arc::clone(&recorder), ForwardErrorPolicy::Continue).await,
        );
        worker.start();

        bus.publish("t1", "first");
        recorder.entered.notified().await;
        bus.publish("t1", "second");
        recorder.entered.notified().await;
        tokio::task::yield_now().await;
        assert_eq!(worker.state(), WorkerState::Running);

        worker.request_stop();
        worker.stopped().await;
        assert_eq!(bus.unsubscribe_count(), 1);
    }

    #[tokio::test]
    async fn test_subscription_failure_aborts_connect() {
        let bus = MemoryBus::default();
        bus.refuse_subscriptions(true);
        let result = BridgeListener::connect(
            &bus,
            "t1",
            Arc::new(Recorder::default()),
            SequenceAllocator::spawn(),
            ForwardErrorPolicy::Exit,
        )
        .await;
        assert!(matches!(result, Err(BusError::Subscription { .. })));
    }
}
