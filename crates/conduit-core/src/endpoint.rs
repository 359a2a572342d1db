//! Connection factory shared by all transports.

use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::pubsub::PubSub;
use crate::registry::ChannelRegistry;
use crate::sink::Sink;
use crate::socket::Socket;
use crate::topic::ChannelTopic;
use conduit_protocol::{Message, Payload};
use std::sync::Arc;
use tracing::info;

/// The entry point a transport uses to open connections.
///
/// Holds the channel registry resolved at startup and the shared pub/sub
/// registry. Every transport served by the same endpoint sees the same topics.
#[derive(Clone)]
pub struct Endpoint {
    registry: Arc<ChannelRegistry>,
    dispatcher: Dispatcher,
}

impl Endpoint {
    /// Create an endpoint with its own pub/sub registry.
    #[must_use]
    pub fn new(registry: ChannelRegistry) -> Self {
        Self::with_pubsub(registry, Arc::new(PubSub::new()))
    }

    /// Create an endpoint sharing an existing pub/sub registry.
    #[must_use]
    pub fn with_pubsub(registry: ChannelRegistry, pubsub: Arc<PubSub>) -> Self {
        info!(channels = ?registry.names(), "Creating endpoint");
        Self {
            registry: Arc::new(registry),
            dispatcher: Dispatcher::new(pubsub),
        }
    }

    /// Open a connection delivering through `sink`.
    #[must_use]
    pub fn connect(&self, sink: Arc<dyn Sink>) -> Connection {
        let socket = Socket::new(sink, Arc::clone(&self.registry));
        Connection::new(socket, self.dispatcher.clone())
    }

    /// Broadcast from the server to every subscriber of a topic.
    ///
    /// Returns the number of successful deliveries.
    pub fn broadcast(
        &self,
        channel: &str,
        topic: &str,
        event: &str,
        payload: Payload,
    ) -> usize {
        let message = Message::new(channel, topic, event, payload);
        self.pubsub()
            .broadcast(&ChannelTopic::new(channel, topic), &message)
    }

    /// Get the channel registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Get the shared pub/sub registry.
    #[must_use]
    pub fn pubsub(&self) -> &Arc<PubSub> {
        self.dispatcher.pubsub()
    }
}
