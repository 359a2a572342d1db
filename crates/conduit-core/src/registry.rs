//! Channel registry.
//!
//! Maps channel names to their handlers. Built once at startup and shared
//! read-only with every connection.

use crate::channel::{validate_channel_name, ChannelHandler};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Invalid channel name.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// Channel already registered.
    #[error("Channel already registered: {0}")]
    DuplicateChannel(String),
}

/// Channel name to handler mapping.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    handlers: HashMap<String, Arc<dyn ChannelHandler>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a channel name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already registered.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        validate_channel_name(&name).map_err(RegistryError::InvalidChannel)?;

        if self.handlers.contains_key(&name) {
            return Err(RegistryError::DuplicateChannel(name));
        }

        debug!(channel = %name, "Registered channel");
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already registered.
    pub fn with_channel(
        mut self,
        name: impl Into<String>,
        handler: impl ChannelHandler + 'static,
    ) -> Result<Self, RegistryError> {
        self.register(name, Arc::new(handler))?;
        Ok(self)
    }

    /// Look up the handler for a channel.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ChannelHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Check if a channel is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Get all registered channel names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Get the number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no channels are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{HandlerResult, JoinOutcome};
    use crate::socket::Socket;
    use conduit_protocol::Payload;

    struct Noop;

    impl ChannelHandler for Noop {
        fn join(&self, _: &mut Socket, _: &str, _: &Payload) -> HandlerResult<JoinOutcome> {
            Ok(JoinOutcome::Ok)
        }

        fn event(&self, _: &mut Socket, _: &str, _: &Payload) -> HandlerResult {
            Ok(())
        }
    }

    #[test]
    fn test_registry_resolve() {
        let registry = ChannelRegistry::new().with_channel("rooms", Noop).unwrap();

        assert!(registry.resolve("rooms").is_some());
        assert!(registry.resolve("missing").is_none());
        assert!(registry.contains("rooms"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_rejects_invalid() {
        assert!(matches!(
            ChannelRegistry::new().with_channel("phoenix", Noop),
            Err(RegistryError::InvalidChannel(_))
        ));
        assert!(matches!(
            ChannelRegistry::new().with_channel("", Noop),
            Err(RegistryError::InvalidChannel(_))
        ));
    }

    #[test]
    fn test_registry_rejects_duplicate() {
        let registry = ChannelRegistry::new().with_channel("rooms", Noop).unwrap();
        assert!(matches!(
            registry.with_channel("rooms", Noop),
            Err(RegistryError::DuplicateChannel(_))
        ));
    }
}
