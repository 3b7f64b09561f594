use async_trait::async_trait;
use serde::Serialize;
use taskmesh_core::TaskmeshResult;
use tokio::sync::mpsc;

/// A message delivered on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Concrete topic the message was published on.
    pub topic: String,
    /// UTF-8 payload, JSON for every taskmesh topic.
    pub payload: String,
    /// Whether this delivery is a replay of a retained message.
    pub retained: bool,
}

impl BusMessage {
    /// Creates a live (non-retained) message.
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained: false,
        }
    }
}

/// A stream of messages matching one topic filter.
///
/// Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    filter: String,
    rx: mpsc::Receiver<BusMessage>,
}

impl Subscription {
    /// Wraps a receiver fed by a transport.
    pub fn new(filter: impl Into<String>, rx: mpsc::Receiver<BusMessage>) -> Self {
        Self {
            filter: filter.into(),
            rx,
        }
    }

    /// The topic filter this subscription was created with.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Waits for the next message. Returns `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    /// Returns the next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}

/// Topic-based publish/subscribe transport.
///
/// Implementations can be an in-process broadcast channel, an MQTT client, etc.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Human-readable transport name, used in logs.
    fn name(&self) -> &str;

    /// Publishes `payload` on `topic`. A retained message replaces the previous
    /// retained message on that topic and is replayed to later subscribers.
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> TaskmeshResult<()>;

    /// Subscribes to every topic matching `filter`.
    async fn subscribe(&self, filter: &str) -> TaskmeshResult<Subscription>;
}

/// Serializes `value` as JSON and publishes it.
pub async fn publish_json<T: Serialize + ?Sized>(
    bus: &dyn MessageBus,
    topic: &str,
    value: &T,
    retain: bool,
) -> TaskmeshResult<()> {
    let payload = serde_json::to_string(value)?;
    bus.publish(topic, payload, retain).await
}
