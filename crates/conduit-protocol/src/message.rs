//! The wire message exchanged on every transport.
//!
//! A message addresses one conversation through its `channel` and `topic`,
//! names an `event`, and carries an opaque JSON object as its payload.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Reserved pseudo-channel for protocol-level events.
pub const PHOENIX_CHANNEL: &str = "phoenix";

/// Topic used for heartbeat replies.
pub const CONN_TOPIC: &str = "conn";

/// Keepalive event on the reserved channel.
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// Lifecycle event that requests authorization for a topic.
pub const JOIN_EVENT: &str = "join";

/// Lifecycle event that releases authorization for a topic.
pub const LEAVE_EVENT: &str = "leave";

/// Message payload: a mapping from string to arbitrary JSON value.
pub type Payload = Map<String, Value>;

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Logical channel name, e.g. `rooms`.
    pub channel: String,
    /// Instance identifier within the channel, e.g. `lobby`.
    pub topic: String,
    /// Reserved lifecycle event or an application-defined event name.
    pub event: String,
    /// Opaque payload, empty when absent on the wire.
    #[serde(default, deserialize_with = "nullable_payload")]
    pub message: Payload,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(
        channel: impl Into<String>,
        topic: impl Into<String>,
        event: impl Into<String>,
        message: Payload,
    ) -> Self {
        Self {
            channel: channel.into(),
            topic: topic.into(),
            event: event.into(),
            message,
        }
    }

    /// The canonical heartbeat, also used as its own reply.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(PHOENIX_CHANNEL, CONN_TOPIC, HEARTBEAT_EVENT, Payload::new())
    }

    /// Whether this is a heartbeat on the reserved channel.
    ///
    /// The topic is not checked: any topic on the reserved channel counts.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.channel == PHOENIX_CHANNEL && self.event == HEARTBEAT_EVENT
    }

    /// Whether this is a `join` request.
    #[must_use]
    pub fn is_join(&self) -> bool {
        self.event == JOIN_EVENT
    }

    /// Whether this is a `leave` request.
    #[must_use]
    pub fn is_leave(&self) -> bool {
        self.event == LEAVE_EVENT
    }

    /// Convert to a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut object = Map::with_capacity(4);
        object.insert("channel".into(), Value::String(self.channel.clone()));
        object.insert("topic".into(), Value::String(self.topic.clone()));
        object.insert("event".into(), Value::String(self.event.clone()));
        object.insert("message".into(), Value::Object(self.message.clone()));
        Value::Object(object)
    }
}

fn nullable_payload<'de, D>(deserializer: D) -> Result<Payload, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Payload>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_heartbeat() {
        let hb = Message::heartbeat();
        assert_eq!(hb.channel, "phoenix");
        assert_eq!(hb.topic, "conn");
        assert!(hb.is_heartbeat());
        assert!(hb.message.is_empty());
    }

    #[test]
    fn test_heartbeat_ignores_topic() {
        let msg = Message::new("phoenix", "elsewhere", "heartbeat", Payload::new());
        assert!(msg.is_heartbeat());

        let msg = Message::new("rooms", "conn", "heartbeat", Payload::new());
        assert!(!msg.is_heartbeat());
    }

    #[test]
    fn test_to_value() {
        let mut payload = Payload::new();
        payload.insert("body".into(), json!("hi"));
        let msg = Message::new("rooms", "lobby", "new:msg", payload);

        assert_eq!(
            msg.to_value(),
            json!({
                "channel": "rooms",
                "topic": "lobby",
                "event": "new:msg",
                "message": {"body": "hi"}
            })
        );
    }
}
