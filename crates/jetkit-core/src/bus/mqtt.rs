use std::time::Duration;

use rumqttc::{
    AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS, SubscribeReasonCode,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use jetkit_config::BridgeConfig;

use super::{BusError, MessageBus, Subscription};
use crate::BoxFuture;

/// How long to wait for CONNACK + SUBACK before giving up.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the disconnect to go out after unsubscribing.
const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(250);

const KEEP_ALIVE: Duration = Duration::from_secs(30);

const RECONNECT_BACKOFF_MIN: Duration = Duration::from_millis(200);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// MQTT broker reached through `rumqttc`, subscribing with QoS 0.
#[derive(Debug, Clone)]
pub struct MqttBus {
    host: String,
    port: u16,
    client_id: String,
}

impl MqttBus {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(&config.host, config.port, &config.client_id)
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        options
    }
}

impl MessageBus for MqttBus {
    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Subscription>, BusError>> {
        Box::pin(async move {
            let failed = |reason: String| BusError::Subscription {
                topic: topic.to_string(),
                reason,
            };

            info!(host = %self.host, port = self.port, topic, "Connecting to MQTT broker");
            let (client, mut eventloop) = AsyncClient::new(self.options(), 16);
            client
                .subscribe(topic, QoS::AtMostOnce)
                .await
                .map_err(|e| failed(e.to_string()))?;

            tokio::time::timeout(SUBSCRIBE_TIMEOUT, await_suback(&mut eventloop))
                .await
                .map_err(|_| failed("timed out waiting for SUBACK".to_string()))?
                .map_err(failed)?;
            info!(topic, "Subscribed");

            let (message_tx, message_rx) = mpsc::channel(64);
            let driver = tokio::spawn(drive_eventloop(
                eventloop,
                client.clone(),
                topic.to_string(),
                message_tx,
            ));

            Ok(Box::new(MqttSubscription {
                topic: topic.to_string(),
                client,
                messages: message_rx,
                driver: Some(driver),
            }) as Box<dyn Subscription>)
        })
    }
}

async fn await_suback(eventloop: &mut EventLoop) -> Result<(), String> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                debug!(code = ?ack.code, "CONNACK received");
            }
            Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    return Err("broker rejected the subscription".to_string());
                }
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }
}

/// Polls the connection and hands publishes to the subscription.
///
/// A connection error is retried with a capped exponential backoff; the next
/// `poll` reconnects. The session is clean, so every reconnect re-subscribes.
/// Exits once the disconnect has been sent or the subscription is gone.
async fn drive_eventloop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topic: String,
    message_tx: mpsc::Sender<Result<Vec<u8>, BusError>>,
) {
    let mut backoff = RECONNECT_BACKOFF_MIN;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                backoff = RECONNECT_BACKOFF_MIN;
                info!(topic = %topic, code = ?ack.code, "Reconnected to MQTT broker, re-subscribing");
                if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                    warn!(topic = %topic, error = %e, "Re-subscribe could not be queued");
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                if message_tx.send(Ok(publish.payload.to_vec())).await.is_err() {
                    debug!(topic = %publish.topic, "Dropping publish received after unsubscribe");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                if message_tx.is_closed() {
                    debug!(topic = %topic, error = %e, "Connection closed after unsubscribe");
                    return;
                }
                warn!(topic = %topic, error = %e, retry_in = ?backoff, "MQTT connection lost");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
            }
        }
    }
}

struct MqttSubscription {
    topic: String,
    client: AsyncClient,
    messages: mpsc::Receiver<Result<Vec<u8>, BusError>>,
    driver: Option<JoinHandle<()>>,
}

impl Drop for MqttSubscription {
    fn drop(&mut self) {
        // Dropped without unsubscribing: the driver would keep reconnecting.
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

impl Subscription for MqttSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn next_message(&mut self) -> BoxFuture<'_, Result<Option<Vec<u8>>, BusError>> {
        Box::pin(async move { self.messages.recv().await.transpose() })
    }

    fn unsubscribe(&mut self) -> BoxFuture<'_, Result<(), BusError>> {
        Box::pin(async move {
            let Some(mut driver) = self.driver.take() else {
                return Ok(());
            };
            self.messages.close();

            let unsubscribed = self.client.unsubscribe(&self.topic).await;
            // Disconnect even if the unsubscribe request could not be queued.
            let _ = self.client.disconnect().await;

            if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut driver)
                .await
                .is_err()
            {
                warn!(topic = %self.topic, "MQTT disconnect timed out, dropping connection");
                driver.abort();
            }
            info!(topic = %self.topic, "Unsubscribed and disconnected");

            unsubscribed.map_err(|e| BusError::Unsubscribe {
                topic: self.topic.clone(),
                reason: e.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one MQTT control packet as (first header byte, body).
    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            len |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![
            0x30,
            (2 + topic.len() + payload.len()) as u8,
            0x00,
            topic.len() as u8,
        ];
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    /// Accept one connection, acknowledge CONNECT and SUBSCRIBE, then publish
    /// `payload` on `topic`. The caller decides when the connection drops.
    async fn serve_session(listener: &TcpListener, topic: &str, payload: &[u8]) -> TcpStream {
        let (mut stream, _) = listener.accept().await.unwrap();
        loop {
            let (header, body) = read_packet(&mut stream).await.unwrap();
            match header >> 4 {
                // CONNECT
                1 => stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap(),
                // SUBSCRIBE
                8 => {
                    stream
                        .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
                        .await
                        .unwrap();
                    stream
                        .write_all(&publish_packet(topic, payload))
                        .await
                        .unwrap();
                    return stream;
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_from_config() {
        let config = BridgeConfig {
            host: "broker.lab".to_string(),
            port: 1884,
            ..BridgeConfig::default()
        };
        let bus = MqttBus::from_config(&config);
        assert_eq!(bus.host, "broker.lab");
        assert_eq!(bus.port, 1884);
        assert_eq!(bus.client_id, "junos-jet-bridge");
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_subscription_failure() {
        // Port 1 on loopback refuses connections.
        let bus = MqttBus::new("127.0.0.1", 1, "jetkit-test");
        let result = bus.subscribe("t1").await;
        match result {
            Err(BusError::Subscription { topic, .. }) => assert_eq!(topic, "t1"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("subscription to a closed port succeeded"),
        }
    }

    #[tokio::test]
    async fn test_reconnects_and_resubscribes_after_broker_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            let first = serve_session(&listener, "t1", b"before").await;
            drop(first);
            serve_session(&listener, "t1", b"after").await
        });

        let bus = MqttBus::new("127.0.0.1", port, "jetkit-test");
        let mut sub = bus.subscribe("t1").await.unwrap();
        assert_eq!(sub.next_message().await.unwrap().unwrap(), b"before");

        let after = tokio::time::timeout(Duration::from_secs(5), sub.next_message())
            .await
            .expect("no message after the broker came back");
        assert_eq!(after.unwrap().unwrap(), b"after");

        let _second = broker.await.unwrap();
        sub.unsubscribe().await.unwrap();
    }
}
