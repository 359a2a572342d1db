//! Message dispatcher.
//!
//! Routes an inbound [`Message`] to the right channel handler callback,
//! enforces topic authorization, and turns the callback's outcome and queued
//! effects into protocol actions.

use crate::channel::{ChannelHandler, HandlerError, JoinOutcome};
use crate::pubsub::PubSub;
use crate::socket::{Effect, Socket};
use crate::topic::ChannelTopic;
use conduit_protocol::{codec, Message, Payload};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Dispatch errors.
///
/// Only [`DispatchError::InvalidHandlerReturn`] is fatal to a connection;
/// the others mean the message was ignored.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// `join` referenced a channel with no registered handler.
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// Event on a topic the socket has not joined.
    #[error("Unauthenticated for {0}")]
    Unauthenticated(ChannelTopic),

    /// A channel handler broke its contract.
    #[error("Invalid handler return on {channel}: {source}")]
    InvalidHandlerReturn {
        /// Pair being dispatched.
        channel: ChannelTopic,
        /// Error raised by the handler.
        #[source]
        source: HandlerError,
    },
}

impl DispatchError {
    /// Check if the error must terminate the connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::InvalidHandlerReturn { .. })
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::UnknownChannel(_) => "unknown_channel",
            DispatchError::Unauthenticated(_) => "unauthenticated",
            DispatchError::InvalidHandlerReturn { .. } => "invalid_handler_return",
        }
    }
}

/// Routes messages for any socket.
///
/// Cheap to clone; every clone shares the same [`PubSub`].
#[derive(Clone)]
pub struct Dispatcher {
    pubsub: Arc<PubSub>,
}

impl Dispatcher {
    /// Create a dispatcher publishing through `pubsub`.
    #[must_use]
    pub fn new(pubsub: Arc<PubSub>) -> Self {
        Self { pubsub }
    }

    /// Get the shared pub/sub registry.
    #[must_use]
    pub fn pubsub(&self) -> &Arc<PubSub> {
        &self.pubsub
    }

    /// Dispatch one inbound message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message was ignored or a handler failed. Check
    /// [`DispatchError::is_fatal`] to decide whether to close the connection.
    pub fn dispatch(&self, socket: &mut Socket, message: Message) -> Result<(), DispatchError> {
        let pair = ChannelTopic::of(&message);
        socket.set_current(pair.clone());

        if message.is_heartbeat() {
            trace!(socket = %socket.id(), "Heartbeat");
            self.deliver(socket, &Message::heartbeat());
            return Ok(());
        }

        if message.is_join() {
            return self.join(socket, pair, &message.message);
        }

        let handler = self.authorized_handler(socket, &pair)?;

        if message.is_leave() {
            let result = handler.leave(socket, &message.message);
            self.flush(socket);
            self.release(socket, &pair);
            result.map_err(|source| invalid_return(pair, source))
        } else {
            debug!(socket = %socket.id(), channel = %pair, event = %message.event, "Event");
            let result = handler.event(socket, &message.event, &message.message);
            self.flush(socket);
            result.map_err(|source| invalid_return(pair, source))
        }
    }

    /// Dispatch a server-side message to the socket's `info` callback.
    ///
    /// # Errors
    ///
    /// Same rules as [`dispatch`](Self::dispatch): the pair must be authorized.
    pub fn dispatch_info(
        &self,
        socket: &mut Socket,
        pair: ChannelTopic,
        payload: &Payload,
    ) -> Result<(), DispatchError> {
        socket.set_current(pair.clone());
        let handler = self.authorized_handler(socket, &pair)?;

        let result = handler.info(socket, payload);
        self.flush(socket);
        result.map_err(|source| invalid_return(pair, source))
    }

    /// Run the disconnect sequence.
    ///
    /// Every authorized pair receives a synthetic `leave` and loses its
    /// subscription. Handler failures are logged and do not stop teardown.
    pub fn teardown(&self, socket: &mut Socket) {
        let mut pairs: Vec<ChannelTopic> = socket.authorized().cloned().collect();
        pairs.sort();

        for pair in pairs {
            socket.set_current(pair.clone());

            if let Some(handler) = socket.registry().resolve(&pair.channel) {
                if let Err(e) = handler.leave(socket, &Payload::new()) {
                    warn!(socket = %socket.id(), channel = %pair, error = %e, "Leave failed during teardown");
                }
                self.flush(socket);
            }

            self.release(socket, &pair);
        }

        debug!(socket = %socket.id(), "Socket torn down");
    }

    fn join(
        &self,
        socket: &mut Socket,
        pair: ChannelTopic,
        payload: &Payload,
    ) -> Result<(), DispatchError> {
        let Some(handler) = socket.registry().resolve(&pair.channel) else {
            debug!(socket = %socket.id(), channel = %pair, "Join on unknown channel");
            return Err(DispatchError::UnknownChannel(pair.channel));
        };

        let outcome = match handler.join(socket, &pair.topic, payload) {
            Ok(outcome) => outcome,
            Err(source) => {
                self.flush(socket);
                return Err(invalid_return(pair, source));
            }
        };

        match outcome {
            JoinOutcome::Ok => {
                socket.authorize(pair.clone());
                self.pubsub
                    .subscribe(&pair, socket.id(), Arc::clone(socket.sink()));
                debug!(socket = %socket.id(), channel = %pair, "Joined");
            }
            JoinOutcome::Error(reason) => {
                debug!(socket = %socket.id(), channel = %pair, reason = %reason, "Join refused");
            }
        }

        self.flush(socket);
        Ok(())
    }

    fn authorized_handler(
        &self,
        socket: &Socket,
        pair: &ChannelTopic,
    ) -> Result<Arc<dyn ChannelHandler>, DispatchError> {
        if !socket.is_authorized(pair) {
            debug!(socket = %socket.id(), channel = %pair, "Unauthenticated");
            return Err(DispatchError::Unauthenticated(pair.clone()));
        }

        socket
            .registry()
            .resolve(&pair.channel)
            .ok_or_else(|| DispatchError::UnknownChannel(pair.channel.clone()))
    }

    fn release(&self, socket: &mut Socket, pair: &ChannelTopic) {
        socket.deauthorize(pair);
        self.pubsub.unsubscribe(pair, socket.id());
        debug!(socket = %socket.id(), channel = %pair, "Left");
    }

    /// Deliver queued effects in the order they were issued.
    fn flush(&self, socket: &mut Socket) {
        for effect in socket.take_effects() {
            match effect {
                Effect::Reply(message) => self.deliver(socket, &message),
                Effect::Broadcast(message) => {
                    self.pubsub.broadcast(&ChannelTopic::of(&message), &message);
                }
                Effect::BroadcastFrom(message) => {
                    self.pubsub
                        .broadcast_from(&ChannelTopic::of(&message), socket.id(), &message);
                }
            }
        }
    }

    fn deliver(&self, socket: &Socket, message: &Message) {
        if let Err(e) = socket.sink().deliver(&codec::encode(message)) {
            trace!(socket = %socket.id(), error = %e, "Reply dropped");
        }
    }
}

fn invalid_return(channel: ChannelTopic, source: HandlerError) -> DispatchError {
    warn!(channel = %channel, error = %source, "Channel handler broke its contract");
    DispatchError::InvalidHandlerReturn { channel, source }
}
