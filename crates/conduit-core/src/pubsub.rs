//! Pub/sub fan-out for Conduit.
//!
//! Maps each `(channel, topic)` to the sinks currently subscribed to it and
//! delivers broadcasts to them. This is the only structure shared between
//! connections.

use crate::sink::Sink;
use crate::socket::SocketId;
use crate::topic::ChannelTopic;
use conduit_protocol::{codec, Message};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Subscriber set for one topic.
type Subscribers = HashMap<SocketId, Arc<dyn Sink>>;

/// The pub/sub registry.
///
/// Each entry is guarded by its DashMap shard lock, so `subscribe`,
/// `unsubscribe` and the broadcast snapshot are individually atomic.
/// Broadcasts release the lock before delivering.
#[derive(Default)]
pub struct PubSub {
    topics: DashMap<ChannelTopic, Subscribers>,
}

impl PubSub {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> PubSubStats {
        PubSubStats {
            topic_count: self.topics.len(),
            total_subscriptions: self.topics.iter().map(|e| e.len()).sum(),
        }
    }

    /// Subscribe a sink to a topic.
    ///
    /// Returns `false` if the socket was already subscribed; its sink is
    /// replaced in that case.
    pub fn subscribe(&self, pair: &ChannelTopic, id: SocketId, sink: Arc<dyn Sink>) -> bool {
        let mut entry = self.topics.entry(pair.clone()).or_insert_with(|| {
            debug!(channel = %pair, "Creating topic");
            HashMap::new()
        });

        let is_new = entry.insert(id, sink).is_none();

        debug!(
            channel = %pair,
            socket = %id,
            subscribers = entry.len(),
            "Subscribed"
        );

        is_new
    }

    /// Unsubscribe a socket from a topic.
    ///
    /// The topic entry is deleted once its last subscriber leaves. Returns
    /// `true` if the socket was subscribed.
    pub fn unsubscribe(&self, pair: &ChannelTopic, id: SocketId) -> bool {
        let removed = match self.topics.get_mut(pair) {
            Some(mut entry) => {
                let removed = entry.remove(&id).is_some();
                debug!(
                    channel = %pair,
                    socket = %id,
                    subscribers = entry.len(),
                    "Unsubscribed"
                );
                removed
            }
            None => false,
        };

        // Re-checked under the shard lock so a concurrent subscribe is not lost.
        if self
            .topics
            .remove_if(pair, |_, subscribers| subscribers.is_empty())
            .is_some()
        {
            debug!(channel = %pair, "Deleted empty topic");
        }

        removed
    }

    /// Broadcast a message to every subscriber of a topic.
    ///
    /// Delivers to a snapshot of the subscribers taken at call time. Failed
    /// deliveries are skipped. Returns the number of successful deliveries.
    pub fn broadcast(&self, pair: &ChannelTopic, message: &Message) -> usize {
        self.fan_out(pair, None, message)
    }

    /// Broadcast a message to every subscriber except `exclude`.
    pub fn broadcast_from(&self, pair: &ChannelTopic, exclude: SocketId, message: &Message) -> usize {
        self.fan_out(pair, Some(exclude), message)
    }

    fn fan_out(&self, pair: &ChannelTopic, exclude: Option<SocketId>, message: &Message) -> usize {
        let snapshot: Vec<(SocketId, Arc<dyn Sink>)> = match self.topics.get(pair) {
            Some(entry) => entry
                .iter()
                .filter(|(id, _)| Some(**id) != exclude)
                .map(|(id, sink)| (*id, Arc::clone(sink)))
                .collect(),
            None => {
                trace!(channel = %pair, "Broadcast to topic without subscribers");
                return 0;
            }
        };

        let frame = codec::encode(message);
        let mut delivered = 0;
        for (id, sink) in snapshot {
            match sink.deliver(&frame) {
                Ok(()) => delivered += 1,
                Err(e) => trace!(channel = %pair, socket = %id, error = %e, "Delivery skipped"),
            }
        }

        trace!(channel = %pair, event = %message.event, recipients = delivered, "Broadcast");
        delivered
    }

    /// Check if a topic has subscribers.
    #[must_use]
    pub fn topic_exists(&self, pair: &ChannelTopic) -> bool {
        self.topics.contains_key(pair)
    }

    /// Check if a socket is subscribed to a topic.
    #[must_use]
    pub fn is_subscribed(&self, pair: &ChannelTopic, id: SocketId) -> bool {
        self.topics
            .get(pair)
            .map(|e| e.contains_key(&id))
            .unwrap_or(false)
    }

    /// Get the subscriber count for a topic.
    #[must_use]
    pub fn subscriber_count(&self, pair: &ChannelTopic) -> usize {
        self.topics.get(pair).map(|e| e.len()).unwrap_or(0)
    }

    /// Get all topics with subscribers.
    #[must_use]
    pub fn topics(&self) -> Vec<ChannelTopic> {
        self.topics.iter().map(|e| e.key().clone()).collect()
    }
}

/// Pub/sub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubSubStats {
    /// Number of topics with at least one subscriber.
    pub topic_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::QueueSink;
    use conduit_protocol::Payload;
    use tokio::sync::mpsc;

    fn sink() -> (Arc<dyn Sink>, mpsc::Receiver<String>) {
        let (sink, rx) = QueueSink::bounded(16);
        (Arc::new(sink), rx)
    }

    fn lobby() -> ChannelTopic {
        ChannelTopic::new("rooms", "lobby")
    }

    fn message(event: &str) -> Message {
        Message::new("rooms", "lobby", event, Payload::new())
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let pubsub = PubSub::new();
        let id = SocketId::generate();
        let (s, _rx) = sink();

        assert!(pubsub.subscribe(&lobby(), id, s.clone()));
        assert!(!pubsub.subscribe(&lobby(), id, s));
        assert!(pubsub.topic_exists(&lobby()));
        assert_eq!(pubsub.subscriber_count(&lobby()), 1);

        assert!(pubsub.unsubscribe(&lobby(), id));
        // Empty topic is deleted
        assert!(!pubsub.topic_exists(&lobby()));
        assert!(!pubsub.unsubscribe(&lobby(), id));
    }

    #[test]
    fn test_broadcast_reaches_all_subscribers() {
        let pubsub = PubSub::new();
        let (s1, mut rx1) = sink();
        let (s2, mut rx2) = sink();
        pubsub.subscribe(&lobby(), SocketId::generate(), s1);
        pubsub.subscribe(&lobby(), SocketId::generate(), s2);

        assert_eq!(pubsub.broadcast(&lobby(), &message("ping")), 2);

        let frame = rx1.try_recv().unwrap();
        assert_eq!(codec::decode(&frame).unwrap(), message("ping"));
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_from_excludes_sender() {
        let pubsub = PubSub::new();
        let sender = SocketId::generate();
        let (s1, mut rx1) = sink();
        let (s2, mut rx2) = sink();
        pubsub.subscribe(&lobby(), sender, s1);
        pubsub.subscribe(&lobby(), SocketId::generate(), s2);

        assert_eq!(pubsub.broadcast_from(&lobby(), sender, &message("ping")), 1);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_skips_closed_sinks() {
        let pubsub = PubSub::new();
        let (s1, rx1) = sink();
        let (s2, mut rx2) = sink();
        pubsub.subscribe(&lobby(), SocketId::generate(), s1);
        pubsub.subscribe(&lobby(), SocketId::generate(), s2);
        drop(rx1);

        assert_eq!(pubsub.broadcast(&lobby(), &message("ping")), 1);
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_is_topic_scoped() {
        let pubsub = PubSub::new();
        let (s1, mut rx1) = sink();
        pubsub.subscribe(&ChannelTopic::new("rooms", "other"), SocketId::generate(), s1);

        assert_eq!(pubsub.broadcast(&lobby(), &message("ping")), 0);
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn test_pubsub_stats() {
        let pubsub = PubSub::new();
        let (s, _rx) = sink();
        let a = SocketId::generate();
        let b = SocketId::generate();

        pubsub.subscribe(&lobby(), a, s.clone());
        pubsub.subscribe(&ChannelTopic::new("rooms", "other"), a, s.clone());
        pubsub.subscribe(&lobby(), b, s);

        let stats = pubsub.stats();
        assert_eq!(stats.topic_count, 2);
        assert_eq!(stats.total_subscriptions, 3);
    }

    #[test]
    fn test_concurrent_subscribe_unsubscribe() {
        let pubsub = Arc::new(PubSub::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pubsub = Arc::clone(&pubsub);
                std::thread::spawn(move || {
                    let (s, _rx) = QueueSink::bounded(1);
                    let s: Arc<dyn Sink> = Arc::new(s);
                    for _ in 0..200 {
                        let id = SocketId::generate();
                        pubsub.subscribe(&lobby(), id, Arc::clone(&s));
                        pubsub.broadcast(&lobby(), &message("ping"));
                        assert!(pubsub.unsubscribe(&lobby(), id));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(!pubsub.topic_exists(&lobby()));
    }
}
