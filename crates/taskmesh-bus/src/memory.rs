use crate::bus::{BusMessage, MessageBus, Subscription};
use crate::filter::{topic_matches, validate_filter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use taskmesh_core::TaskmeshResult;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// In-process bus built on a tokio broadcast channel.
///
/// Every subscription gets a forwarding task that filters the broadcast stream by
/// topic. Retained messages are kept per topic and replayed to new subscribers
/// before any live message.
pub struct InMemoryBus {
    tx: broadcast::Sender<BusMessage>,
    retained: Mutex<HashMap<String, BusMessage>>,
    capacity: usize,
}

impl InMemoryBus {
    /// Creates a bus whose broadcast and per-subscription buffers hold `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            retained: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// The retained message on `topic`, if any.
    pub fn retained(&self, topic: &str) -> Option<BusMessage> {
        self.retained.lock().get(topic).cloned()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, topic: &str, payload: String, retain: bool) -> TaskmeshResult<()> {
        let message = BusMessage::new(topic, payload);
        // Retained update and send happen under one lock so a concurrent subscriber
        // sees the message either as a replay or live, never both or neither.
        let mut retained = self.retained.lock();
        if retain {
            if message.payload.is_empty() {
                retained.remove(topic);
            } else {
                retained.insert(
                    topic.to_string(),
                    BusMessage {
                        retained: true,
                        ..message.clone()
                    },
                );
            }
        }
        if self.tx.send(message).is_err() {
            debug!(topic = %topic, "Published with no subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> TaskmeshResult<Subscription> {
        validate_filter(filter)?;

        let (replay, mut live) = {
            let retained = self.retained.lock();
            let mut replay: Vec<BusMessage> = retained
                .values()
                .filter(|m| topic_matches(filter, &m.topic))
                .cloned()
                .collect();
            replay.sort_by(|a, b| a.topic.cmp(&b.topic));
            (replay, self.tx.subscribe())
        };

        let (tx, rx) = mpsc::channel(self.capacity.max(replay.len()));
        for message in replay {
            // Capacity covers the replay, so this cannot fail while rx is alive.
            let _ = tx.try_send(message);
        }

        let owned_filter = filter.to_string();
        tokio::spawn(async move {
            loop {
                match live.recv().await {
                    Ok(message) => {
                        if !topic_matches(&owned_filter, &message.topic) {
                            continue;
                        }
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(filter = %owned_filter, skipped, "Subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(filter, rx))
    }
}
