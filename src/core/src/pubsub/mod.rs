//! Publish/subscribe on top of gossip.
//!
//! Every [`Subscription`] owns a bounded queue. A full queue drops the message
//! for that subscription only. Closing a subscription discards whatever is
//! still queued and wakes a pending [`Subscription::recv`] at once.

use bytes::Bytes;
use futures::Stream;
use metrics::counter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SwarmError};
use crate::gossip::{GossipTransport, Message, MessageSink};
use crate::identity::MessageId;
use crate::telemetry::names;

// ═══════════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════════

struct Entry {
    tx: mpsc::Sender<Message>,
    token: CancellationToken,
}

impl Entry {
    fn is_live(&self) -> bool {
        !self.token.is_cancelled() && !self.tx.is_closed()
    }
}

/// Local subscriptions by topic.
#[derive(Default)]
pub struct SubscriptionRegistry {
    topics: Mutex<HashMap<String, Vec<Entry>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, topic: &str, tx: mpsc::Sender<Message>, token: CancellationToken) -> bool {
        let mut topics = self.topics.lock();
        let entries = topics.entry(topic.to_string()).or_default();
        entries.retain(Entry::is_live);
        let first = entries.is_empty();
        entries.push(Entry { tx, token });
        first
    }

    /// Open subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map(|entries| entries.iter().filter(|e| e.is_live()).count())
            .unwrap_or(0)
    }

    /// Topics with at least one open subscription, sorted.
    pub fn topics(&self) -> Vec<String> {
        let topics = self.topics.lock();
        let mut list: Vec<String> = topics
            .iter()
            .filter(|(_, entries)| entries.iter().any(Entry::is_live))
            .map(|(topic, _)| topic.clone())
            .collect();
        list.sort();
        list
    }

    /// Close every subscription on `topic`. Returns how many were open.
    pub fn close_topic(&self, topic: &str) -> usize {
        let entries = self.topics.lock().remove(topic).unwrap_or_default();
        let mut closed = 0;
        for entry in entries {
            if entry.is_live() {
                closed += 1;
            }
            entry.token.cancel();
        }
        closed
    }
}

impl MessageSink for SubscriptionRegistry {
    fn deliver(&self, message: &Message) -> usize {
        let mut topics = self.topics.lock();
        let Some(entries) = topics.get_mut(&message.topic) else {
            return 0;
        };
        entries.retain(Entry::is_live);

        let mut delivered = 0;
        for entry in entries.iter() {
            match entry.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    counter!(names::PUBSUB_DROPPED_TOTAL).increment(1);
                    warn!(
                        topic = %message.topic,
                        message_id = %message.id.short(),
                        "Subscription queue full, dropping message"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        if entries.is_empty() {
            topics.remove(&message.topic);
        }
        delivered
    }

    fn has_subscribers(&self, topic: &str) -> bool {
        self.subscriber_count(topic) > 0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Subscription
// ═══════════════════════════════════════════════════════════════════════════════

/// A stream of messages on one topic. Open until closed or dropped.
pub struct Subscription {
    topic: String,
    rx: mpsc::Receiver<Message>,
    token: CancellationToken,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next message.
    ///
    /// # Errors
    ///
    /// `SubscriptionClosed` once the subscription is closed, including while
    /// this call is pending.
    pub async fn recv(&mut self) -> Result<Message> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(SwarmError::subscription_closed(&self.topic)),
            message = self.rx.recv() => match message {
                Some(message) if !self.token.is_cancelled() => Ok(message),
                _ => Err(SwarmError::subscription_closed(&self.topic)),
            },
        }
    }

    /// Next queued message, if any, without waiting.
    pub fn try_recv(&mut self) -> Result<Option<Message>> {
        if self.token.is_cancelled() {
            return Err(SwarmError::subscription_closed(&self.topic));
        }
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(SwarmError::subscription_closed(&self.topic))
            }
        }
    }

    /// Close now. Queued messages are discarded. Idempotent.
    pub fn close(&self) {
        if !self.token.is_cancelled() {
            debug!(topic = %self.topic, "Subscription closed");
        }
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A handle that can close this subscription from elsewhere.
    pub fn closer(&self) -> SubscriptionCloser {
        SubscriptionCloser {
            token: self.token.clone(),
        }
    }

    /// Consume as a stream that ends when the subscription closes.
    pub fn into_stream(self) -> impl Stream<Item = Message> + Send + Unpin {
        Box::pin(futures::stream::unfold(self, |mut sub| async move {
            match sub.recv().await {
                Ok(message) => Some((message, sub)),
                Err(_) => None,
            }
        }))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Cloneable close handle for a [`Subscription`].
#[derive(Debug, Clone)]
pub struct SubscriptionCloser {
    token: CancellationToken,
}

impl SubscriptionCloser {
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PubSub
// ═══════════════════════════════════════════════════════════════════════════════

/// Topic API for one agent.
#[derive(Clone)]
pub struct PubSub {
    gossip: GossipTransport,
    registry: Arc<SubscriptionRegistry>,
    queue_capacity: usize,
}

impl PubSub {
    pub fn new(
        gossip: GossipTransport,
        registry: Arc<SubscriptionRegistry>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            gossip,
            registry,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Publish to every subscriber of `topic`, local or remote.
    ///
    /// # Errors
    ///
    /// `PayloadTooLarge` if the payload exceeds the configured limit.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> Result<MessageId> {
        let message = self.gossip.publish(topic, payload.into())?;
        Ok(message.id)
    }

    /// Start receiving `topic`. Messages published before this call are not
    /// replayed.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let token = CancellationToken::new();
        let first = self.registry.register(topic, tx, token.clone());
        // Delivery may have pruned the topic after registration.
        self.gossip.add_local_topic(topic);
        debug!(topic, first, "Subscribed");
        Subscription {
            topic: topic.to_string(),
            rx,
            token,
        }
    }

    /// Close every local subscription on `topic` and withdraw interest.
    pub fn unsubscribe(&self, topic: &str) -> usize {
        let closed = self.registry.close_topic(topic);
        self.gossip.remove_local_topic(topic);
        closed
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.subscriber_count(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        self.registry.topics()
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.gossip.max_payload_bytes()
    }

    /// Subscribed topics that a neighbor has just started asking for.
    pub fn interest_events(&self) -> broadcast::Receiver<String> {
        self.gossip.interest_events()
    }
}

impl std::fmt::Debug for PubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSub")
            .field("topics", &self.topics())
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}
