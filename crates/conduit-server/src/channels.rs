//! Channels served by the Conduit binary.

use conduit_core::{ChannelHandler, ChannelRegistry, HandlerResult, JoinOutcome, RegistryError, Socket};
use conduit_protocol::Payload;
use serde_json::Value;
use tracing::debug;

/// Prefix of topics that require a `token` to join.
const PRIVATE_PREFIX: &str = "private:";

/// Chat rooms.
///
/// Every topic is a room. Joining announces the user to the room, `new:msg`
/// relays a message to everyone in it, and leaving tells the others.
pub struct RoomsChannel;

impl RoomsChannel {
    fn user(socket: &Socket) -> Value {
        socket
            .get_assign("user")
            .cloned()
            .unwrap_or_else(|| Value::String(socket.id().to_string()))
    }

    fn user_payload(socket: &Socket) -> Payload {
        let mut payload = Payload::new();
        payload.insert("user".into(), Self::user(socket));
        payload
    }
}

impl ChannelHandler for RoomsChannel {
    fn join(&self, socket: &mut Socket, topic: &str, payload: &Payload) -> HandlerResult<JoinOutcome> {
        if topic.starts_with(PRIVATE_PREFIX) && !payload.contains_key("token") {
            debug!(socket = %socket.id(), topic, "Refusing private room without token");
            return Ok(JoinOutcome::error("unauthorized"));
        }

        if let Some(user) = payload.get("user").filter(|u| u.is_string()) {
            socket.assign("user", user.clone());
        }

        let mut reply = Payload::new();
        reply.insert("status".into(), "connected".into());
        socket.reply("join", reply);
        socket.broadcast("user:entered", Self::user_payload(socket));
        Ok(JoinOutcome::Ok)
    }

    fn leave(&self, socket: &mut Socket, _payload: &Payload) -> HandlerResult {
        socket.broadcast_from("user:left", Self::user_payload(socket));
        Ok(())
    }

    fn event(&self, socket: &mut Socket, event: &str, payload: &Payload) -> HandlerResult {
        match event {
            "new:msg" => socket.broadcast("new:msg", payload.clone()),
            other => debug!(socket = %socket.id(), event = other, "Ignoring unknown room event"),
        }
        Ok(())
    }
}

/// Build the registry of every channel the server exposes.
///
/// # Errors
///
/// Returns an error if a channel name is rejected.
pub fn registry() -> Result<ChannelRegistry, RegistryError> {
    ChannelRegistry::new().with_channel("rooms", RoomsChannel)
}
