//! BrokerClient - resilient MQTT connection manager
//!
//! ## Responsibilities
//!
//! - Single MQTT connection shared by publishers and the inbound router
//! - Publish with "delivered or false" semantics (never raises)
//! - 切断時は固定バックオフで再接続し、購読を再発行してから ready 扱い
//!
//! Outbound publishes are serialized by rumqttc's internal request channel,
//! so concurrent callers never interleave writes on the wire. Inbound
//! delivery happens on the event-loop task and is handed to the router on
//! a spawned task per message so slow handlers cannot stall the loop.

use crate::message_router::MessageRouter;
use crate::state::AppConfig;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Backoff before the next poll after a connection error
const RECONNECT_DELAY_SECS: u64 = 5;

/// Publish seam consumed by the edge service
///
/// Returns false when the message could not be handed to a live
/// connection - callers must treat false as "not delivered", never
/// as an exception.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> bool;
}

/// MQTT connection manager
pub struct BrokerClient {
    client: AsyncClient,
    /// Event loop, taken exactly once by `start`
    event_loop: std::sync::Mutex<Option<EventLoop>>,
    connected: AtomicBool,
    /// Topic patterns to (re-)subscribe after every connect
    subscriptions: RwLock<Vec<String>>,
}

impl BrokerClient {
    /// Create a new client for the configured broker (not yet polling)
    pub fn new(config: &AppConfig) -> Self {
        let client_id = format!("{}_{}", config.mqtt_client_id, Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, &config.mqtt_host, config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, event_loop) = AsyncClient::new(options, 64);

        Self {
            client,
            event_loop: std::sync::Mutex::new(Some(event_loop)),
            connected: AtomicBool::new(false),
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    /// Whether a live broker connection currently exists
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Register a topic pattern
    ///
    /// The pattern is re-issued after every (re)connect. If a connection
    /// is already live the subscribe is sent immediately as well.
    pub async fn subscribe(&self, pattern: &str) {
        self.subscriptions.write().await.push(pattern.to_string());

        if self.is_connected() {
            if let Err(e) = self.client.subscribe(pattern, QoS::AtLeastOnce).await {
                tracing::warn!(pattern = %pattern, error = %e, "Subscribe failed, will retry on reconnect");
            }
        }
    }

    /// Start the event-loop driver task
    ///
    /// Every inbound publish is dispatched to the router. On poll errors
    /// the connected flag is cleared and polling resumes after a fixed
    /// backoff; rumqttc reconnects on the next poll and we re-subscribe
    /// when the ConnAck arrives.
    pub fn start(self: &Arc<Self>, router: Arc<MessageRouter>) {
        let mut event_loop = self
            .event_loop
            .lock()
            .expect("event loop mutex poisoned")
            .take()
            .expect("BrokerClient::start called twice");

        let broker = self.clone();

        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        broker.connected.store(true, Ordering::SeqCst);
                        broker.resubscribe_all().await;
                        tracing::info!("MQTT connected");
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let router = router.clone();
                        let topic = publish.topic;
                        let payload = publish.payload.to_vec();
                        // ルーター処理でイベントループを塞がない
                        tokio::spawn(async move {
                            router.dispatch(&topic, &payload).await;
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let was_connected = broker.connected.swap(false, Ordering::SeqCst);
                        if was_connected {
                            tracing::warn!(
                                error = %e,
                                delay_sec = RECONNECT_DELAY_SECS,
                                "MQTT disconnected, reconnecting"
                            );
                        } else {
                            tracing::debug!(error = %e, "MQTT connect attempt failed");
                        }
                        tokio::time::sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
                    }
                }
            }
        });
    }

    /// Re-issue every registered subscription (after reconnect)
    async fn resubscribe_all(&self) {
        let patterns = self.subscriptions.read().await.clone();
        for pattern in patterns {
            if let Err(e) = self.client.subscribe(&pattern, QoS::AtLeastOnce).await {
                tracing::error!(pattern = %pattern, error = %e, "Re-subscribe failed");
            } else {
                tracing::debug!(pattern = %pattern, "Subscribed");
            }
        }
    }
}

#[async_trait]
impl CommandPublisher for BrokerClient {
    /// Publish QoS1, no retain. False when no live connection exists or
    /// the client rejects the message - never an error.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> bool {
        if !self.is_connected() {
            tracing::warn!(topic = %topic, "Publish attempted without live connection");
            return false;
        }

        match self
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
        {
            Ok(()) => {
                tracing::debug!(topic = %topic, "MQTT published");
                true
            }
            Err(e) => {
                tracing::error!(topic = %topic, error = %e, "Publish failed");
                false
            }
        }
    }
}
