//! Per-connection socket state.
//!
//! A [`Socket`] is owned by the task serving its connection. It records the
//! conversation most recently addressed, the topics it is authorized for, and
//! the side effects handler callbacks have queued.

use crate::registry::ChannelRegistry;
use crate::sink::Sink;
use crate::topic::ChannelTopic;
use conduit_protocol::{Message, Payload};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counter for socket identifiers.
static SOCKET_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique socket identifier within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    /// Generate a new unique ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket_{}", self.0)
    }
}

/// A side effect queued by a handler callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send directly to this socket.
    Reply(Message),
    /// Fan out to every subscriber of the message's topic, sender included.
    Broadcast(Message),
    /// Fan out to every subscriber except the sender.
    BroadcastFrom(Message),
}

/// Connection state threaded through every dispatch.
pub struct Socket {
    id: SocketId,
    current: ChannelTopic,
    authorized: HashSet<ChannelTopic>,
    assigns: HashMap<String, Value>,
    sink: Arc<dyn Sink>,
    registry: Arc<ChannelRegistry>,
    effects: Vec<Effect>,
}

impl Socket {
    /// Create a socket for a freshly accepted connection.
    #[must_use]
    pub fn new(sink: Arc<dyn Sink>, registry: Arc<ChannelRegistry>) -> Self {
        Self {
            id: SocketId::generate(),
            current: ChannelTopic::default(),
            authorized: HashSet::new(),
            assigns: HashMap::new(),
            sink,
            registry,
            effects: Vec::new(),
        }
    }

    /// Get the socket ID.
    #[must_use]
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Channel of the conversation most recently addressed.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.current.channel
    }

    /// Topic of the conversation most recently addressed.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.current.topic
    }

    /// The `(channel, topic)` most recently addressed.
    #[must_use]
    pub fn current(&self) -> &ChannelTopic {
        &self.current
    }

    /// Check if the socket is authorized for a pair.
    #[must_use]
    pub fn is_authorized(&self, pair: &ChannelTopic) -> bool {
        self.authorized.contains(pair)
    }

    /// All authorized pairs.
    pub fn authorized(&self) -> impl Iterator<Item = &ChannelTopic> {
        self.authorized.iter()
    }

    /// Number of authorized pairs.
    #[must_use]
    pub fn authorized_count(&self) -> usize {
        self.authorized.len()
    }

    /// The channel registry this socket resolves against.
    #[must_use]
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Store a value on the socket.
    pub fn assign(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.assigns.insert(key.into(), value.into());
    }

    /// Read a stored value.
    #[must_use]
    pub fn get_assign(&self, key: &str) -> Option<&Value> {
        self.assigns.get(key)
    }

    /// Queue a reply to this socket on the current topic.
    pub fn reply(&mut self, event: impl Into<String>, payload: Payload) {
        let message = self.message(event, payload);
        self.effects.push(Effect::Reply(message));
    }

    /// Queue a broadcast to every subscriber of the current topic.
    pub fn broadcast(&mut self, event: impl Into<String>, payload: Payload) {
        let message = self.message(event, payload);
        self.effects.push(Effect::Broadcast(message));
    }

    /// Queue a broadcast to every subscriber of the current topic but this one.
    pub fn broadcast_from(&mut self, event: impl Into<String>, payload: Payload) {
        let message = self.message(event, payload);
        self.effects.push(Effect::BroadcastFrom(message));
    }

    fn message(&self, event: impl Into<String>, payload: Payload) -> Message {
        Message::new(
            self.current.channel.clone(),
            self.current.topic.clone(),
            event,
            payload,
        )
    }

    pub(crate) fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    pub(crate) fn set_current(&mut self, pair: ChannelTopic) {
        self.current = pair;
    }

    pub(crate) fn authorize(&mut self, pair: ChannelTopic) -> bool {
        self.authorized.insert(pair)
    }

    pub(crate) fn deauthorize(&mut self, pair: &ChannelTopic) -> bool {
        self.authorized.remove(pair)
    }

    pub(crate) fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("current", &self.current)
            .field("authorized", &self.authorized)
            .field("assigns", &self.assigns)
            .field("pending_effects", &self.effects.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::QueueSink;
    use serde_json::json;

    fn socket() -> Socket {
        let (sink, _rx) = QueueSink::bounded(8);
        Socket::new(Arc::new(sink), Arc::new(ChannelRegistry::new()))
    }

    #[test]
    fn test_unique_socket_ids() {
        assert_ne!(SocketId::generate(), SocketId::generate());
        assert!(SocketId::generate().to_string().starts_with("socket_"));
    }

    #[test]
    fn test_effects_address_current_topic() {
        let mut socket = socket();
        socket.set_current(ChannelTopic::new("rooms", "lobby"));

        socket.reply("join", Payload::new());
        socket.broadcast("user:entered", Payload::new());

        let effects = socket.take_effects();
        assert_eq!(effects.len(), 2);
        match &effects[0] {
            Effect::Reply(msg) => {
                assert_eq!(msg.channel, "rooms");
                assert_eq!(msg.topic, "lobby");
                assert_eq!(msg.event, "join");
            }
            other => panic!("Expected reply, got {:?}", other),
        }
        assert!(matches!(&effects[1], Effect::Broadcast(msg) if msg.event == "user:entered"));
        assert!(socket.take_effects().is_empty());
    }

    #[test]
    fn test_authorization_set() {
        let mut socket = socket();
        let pair = ChannelTopic::new("rooms", "lobby");

        assert!(!socket.is_authorized(&pair));
        assert!(socket.authorize(pair.clone()));
        assert!(!socket.authorize(pair.clone()));
        assert_eq!(socket.authorized_count(), 1);

        assert!(socket.deauthorize(&pair));
        assert!(!socket.is_authorized(&pair));
    }

    #[test]
    fn test_assigns() {
        let mut socket = socket();
        socket.assign("user", "alice");
        socket.assign("count", 3);

        assert_eq!(socket.get_assign("user"), Some(&json!("alice")));
        assert_eq!(socket.get_assign("count"), Some(&json!(3)));
        assert!(socket.get_assign("missing").is_none());
    }
}
