//! Channel handler contract.
//!
//! A channel handler implements the application logic for one named channel.
//! The dispatcher calls it with the connection's [`Socket`] for each
//! lifecycle or application event addressed to that channel.

use crate::socket::Socket;
use conduit_protocol::{Payload, PHOENIX_CHANNEL};
use thiserror::Error;

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// Validate a channel name for registration.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if name == PHOENIX_CHANNEL {
        return Err("Channel name 'phoenix' is reserved");
    }
    if name.chars().any(char::is_control) {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

/// Error raised by a handler callback.
///
/// Returning this breaks the handler contract and terminates the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    /// Create a new handler error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    /// Get the error reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.0
    }
}

/// Result type for handler callbacks.
pub type HandlerResult<T = ()> = Result<T, HandlerError>;

/// Outcome of a join attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Join accepted: the socket becomes authorized and subscribed.
    Ok,
    /// Join refused with a reason. Nothing is sent to the client.
    Error(String),
}

impl JoinOutcome {
    /// Create a refusal.
    #[must_use]
    pub fn error(reason: impl Into<String>) -> Self {
        JoinOutcome::Error(reason.into())
    }

    /// Check if the join was accepted.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, JoinOutcome::Ok)
    }
}

/// Application logic for one channel.
///
/// Callbacks mutate the socket in place. Replies and broadcasts are queued
/// with [`Socket::reply`], [`Socket::broadcast`] and
/// [`Socket::broadcast_from`]; the dispatcher delivers them once the callback
/// returns.
///
/// ```rust
/// use conduit_core::{ChannelHandler, HandlerResult, JoinOutcome, Socket};
/// use conduit_protocol::Payload;
///
/// struct Echo;
///
/// impl ChannelHandler for Echo {
///     fn join(&self, _socket: &mut Socket, _topic: &str, _payload: &Payload) -> HandlerResult<JoinOutcome> {
///         Ok(JoinOutcome::Ok)
///     }
///
///     fn event(&self, socket: &mut Socket, event: &str, payload: &Payload) -> HandlerResult {
///         socket.reply(event, payload.clone());
///         Ok(())
///     }
/// }
/// ```
pub trait ChannelHandler: Send + Sync {
    /// Authorize the socket for `topic`.
    fn join(&self, socket: &mut Socket, topic: &str, payload: &Payload)
        -> HandlerResult<JoinOutcome>;

    /// Called before the socket loses authorization for the current topic,
    /// either on request or when the connection closes.
    fn leave(&self, _socket: &mut Socket, _payload: &Payload) -> HandlerResult {
        Ok(())
    }

    /// Handle an application event on an authorized topic.
    fn event(&self, socket: &mut Socket, event: &str, payload: &Payload) -> HandlerResult;

    /// Handle a server-side message addressed to this connection.
    fn info(&self, _socket: &mut Socket, _payload: &Payload) -> HandlerResult {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_validation() {
        assert!(validate_channel_name("rooms").is_ok());
        assert!(validate_channel_name("chat:room").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("phoenix").is_err());
        assert!(validate_channel_name("bad\nname").is_err());

        let long_name = "a".repeat(MAX_CHANNEL_NAME_LENGTH + 1);
        assert!(validate_channel_name(&long_name).is_err());
    }

    #[test]
    fn test_join_outcome() {
        assert!(JoinOutcome::Ok.is_ok());
        assert!(!JoinOutcome::error("denied").is_ok());
    }
}
