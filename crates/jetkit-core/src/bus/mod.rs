//! Publish/subscribe message-bus collaborator.
//!
//! The bridge only needs three operations from a bus: subscribe to a topic,
//! pull the next payload, and unsubscribe. [`MqttBus`] talks to a real broker
//! through `rumqttc`; [`MemoryBus`] is an in-process broker for tests and
//! local runs.

mod memory;
mod mqtt;

pub use memory::MemoryBus;
pub use mqtt::MqttBus;

use crate::BoxFuture;

/// Errors from the message bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Connecting or subscribing failed. Fatal at startup.
    #[error("subscription to '{topic}' failed: {reason}")]
    Subscription { topic: String, reason: String },

    /// The connection broke while receiving.
    #[error("receive failed: {0}")]
    Receive(String),

    /// Unsubscribing or disconnecting failed.
    #[error("unsubscribe from '{topic}' failed: {reason}")]
    Unsubscribe { topic: String, reason: String },
}

/// A broker the bridge can subscribe to.
pub trait MessageBus: Send + Sync {
    /// Subscribe to `topic`. Resolves once the broker has acknowledged.
    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Subscription>, BusError>>;
}

/// An open subscription: a lazy, unbounded sequence of payloads.
pub trait Subscription: Send {
    /// The subscribed topic.
    fn topic(&self) -> &str;

    /// Wait for the next payload. `Ok(None)` means the subscription closed.
    ///
    /// Cancel-safe: dropping the future before it resolves loses no payload.
    fn next_message(&mut self) -> BoxFuture<'_, Result<Option<Vec<u8>>, BusError>>;

    /// Unsubscribe and release the connection.
    fn unsubscribe(&mut self) -> BoxFuture<'_, Result<(), BusError>>;
}
