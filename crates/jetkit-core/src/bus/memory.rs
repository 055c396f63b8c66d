use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{BusError, MessageBus, Subscription};
use crate::BoxFuture;

/// In-process broker built on a tokio broadcast channel.
///
/// Topics match exactly. The broker counts subscriptions and unsubscribes
/// so callers can verify that every subscription was released.
#[derive(Clone)]
pub struct MemoryBus {
    tx: broadcast::Sender<(String, Vec<u8>)>,
    subscribed: Arc<AtomicUsize>,
    unsubscribed: Arc<AtomicUsize>,
    refuse_subscriptions: Arc<AtomicBool>,
}

impl MemoryBus {
    /// Create a broker buffering up to `capacity` undelivered messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            subscribed: Arc::new(AtomicUsize::new(0)),
            unsubscribed: Arc::new(AtomicUsize::new(0)),
            refuse_subscriptions: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Publish `payload` on `topic`; returns how many subscriptions may see it.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        self.tx
            .send((topic.to_string(), payload.into()))
            .unwrap_or(0)
    }

    /// Make every subsequent `subscribe` fail, as a broker that is down would.
    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.refuse_subscriptions.store(refuse, Ordering::SeqCst);
    }

    /// Number of successful subscriptions so far.
    pub fn subscription_count(&self) -> usize {
        self.subscribed.load(Ordering::SeqCst)
    }

    /// Number of unsubscribes so far.
    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    /// Subscriptions that have not been released.
    pub fn open_subscriptions(&self) -> usize {
        self.subscription_count() - self.unsubscribe_count()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MessageBus for MemoryBus {
    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Subscription>, BusError>> {
        Box::pin(async move {
            if self.refuse_subscriptions.load(Ordering::SeqCst) {
                return Err(BusError::Subscription {
                    topic: topic.to_string(),
                    reason: "broker refused connection".to_string(),
                });
            }
            self.subscribed.fetch_add(1, Ordering::SeqCst);
            debug!(topic, "In-process subscription opened");
            Ok(Box::new(MemorySubscription {
                topic: topic.to_string(),
                rx: Some(self.tx.subscribe()),
                unsubscribed: Arc::clone(&self.unsubscribed),
            }) as Box<dyn Subscription>)
        })
    }
}

struct MemorySubscription {
    topic: String,
    rx: Option<broadcast::Receiver<(String, Vec<u8>)>>,
    unsubscribed: Arc<AtomicUsize>,
}

impl Subscription for MemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn next_message(&mut self) -> BoxFuture<'_, Result<Option<Vec<u8>>, BusError>> {
        Box::pin(async move {
            let Some(rx) = self.rx.as_mut() else {
                return Ok(None);
            };
            loop {
                match rx.recv().await {
                    Ok((topic, payload)) if topic == self.topic => return Ok(Some(payload)),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(topic = %self.topic, skipped, "Subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(None),
                }
            }
        })
    }

    fn unsubscribe(&mut self) -> BoxFuture<'_, Result<(), BusError>> {
        Box::pin(async move {
            if self.rx.take().is_some() {
                self.unsubscribed.fetch_add(1, Ordering::SeqCst);
                debug!(topic = %self.topic, "In-process subscription closed");
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_matching_topic_only() {
        let bus = MemoryBus::default();
        let mut sub = bus.subscribe("t1").await.unwrap();

        bus.publish("t2", "ignored");
        bus.publish("t1", "hello");

        let payload = sub.next_message().await.unwrap().unwrap();
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn test_unsubscribe_counts_once() {
        let bus = MemoryBus::default();
        let mut sub = bus.subscribe("t1").await.unwrap();
        assert_eq!(bus.open_subscriptions(), 1);

        sub.unsubscribe().await.unwrap();
        sub.unsubscribe().await.unwrap();
        assert_eq!(bus.unsubscribe_count(), 1);
        assert_eq!(bus.open_subscriptions(), 0);
        assert!(sub.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refused_subscription() {
        let bus = MemoryBus::default();
        bus.refuse_subscriptions(true);
        let result = bus.subscribe("t1").await;
        assert!(matches!(result, Err(BusError::Subscription { .. })));
        assert_eq!(bus.subscription_count(), 0);
    }
}
