//! Channel/topic addressing.

use conduit_protocol::Message;
use std::fmt;

/// A `(channel, topic)` pair identifying one conversation.
///
/// Authorization and pub/sub subscriptions are both keyed by this pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelTopic {
    /// Channel name, e.g. `rooms`.
    pub channel: String,
    /// Topic within the channel, e.g. `lobby`.
    pub topic: String,
}

impl ChannelTopic {
    /// Create a new pair.
    #[must_use]
    pub fn new(channel: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            topic: topic.into(),
        }
    }

    /// The pair a message is addressed to.
    #[must_use]
    pub fn of(message: &Message) -> Self {
        Self::new(message.channel.clone(), message.topic.clone())
    }

    /// Check whether a message is addressed to this pair.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        self.channel == message.channel && self.topic == message.topic
    }
}

impl fmt::Display for ChannelTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.topic)
    }
}

impl From<(&str, &str)> for ChannelTopic {
    fn from((channel, topic): (&str, &str)) -> Self {
        Self::new(channel, topic)
    }
}
