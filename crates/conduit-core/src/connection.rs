//! Transport-independent connection driver.
//!
//! A [`Connection`] owns one [`Socket`] and feeds it every frame the
//! transport receives, in order. Transports only move bytes; all protocol
//! decisions happen here and in the [`Dispatcher`].

use crate::dispatcher::{DispatchError, Dispatcher};
use crate::socket::{Socket, SocketId};
use crate::topic::ChannelTopic;
use conduit_protocol::{codec, Message, Payload};
use metrics::counter;
use tracing::{debug, error};

/// Counter of dispatch errors, labelled by [`DispatchError::kind`].
pub const DISPATCH_ERRORS_TOTAL: &str = "conduit_dispatch_errors_total";

/// A live connection.
///
/// Teardown runs on [`close`](Self::close) or, failing that, on drop.
pub struct Connection {
    socket: Socket,
    dispatcher: Dispatcher,
    closed: bool,
}

impl Connection {
    /// Create a connection around a fresh socket.
    #[must_use]
    pub fn new(socket: Socket, dispatcher: Dispatcher) -> Self {
        debug!(socket = %socket.id(), "Connection opened");
        Self {
            socket,
            dispatcher,
            closed: false,
        }
    }

    /// Get the socket ID.
    #[must_use]
    pub fn id(&self) -> SocketId {
        self.socket.id()
    }

    /// Get the socket state.
    #[must_use]
    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// Check if the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Decode and dispatch one inbound frame.
    ///
    /// Malformed frames and ignored messages are absorbed.
    ///
    /// # Errors
    ///
    /// Returns an error only when the connection must be torn down.
    pub fn handle_frame(&mut self, frame: &str) -> Result<(), DispatchError> {
        match codec::decode(frame) {
            Ok(message) => self.handle_message(message),
            Err(e) => {
                debug!(socket = %self.socket.id(), error = %e, "Dropping malformed frame");
                Ok(())
            }
        }
    }

    /// Dispatch one inbound message.
    ///
    /// # Errors
    ///
    /// Returns an error only when the connection must be torn down.
    pub fn handle_message(&mut self, message: Message) -> Result<(), DispatchError> {
        if self.closed {
            return Ok(());
        }
        let result = self.dispatcher.dispatch(&mut self.socket, message);
        self.absorb(result)
    }

    /// Deliver a server-side message to the handler of an authorized pair.
    ///
    /// # Errors
    ///
    /// Returns an error only when the connection must be torn down.
    pub fn handle_info(&mut self, pair: ChannelTopic, payload: &Payload) -> Result<(), DispatchError> {
        if self.closed {
            return Ok(());
        }
        let result = self.dispatcher.dispatch_info(&mut self.socket, pair, payload);
        self.absorb(result)
    }

    /// Run teardown. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.dispatcher.teardown(&mut self.socket);
        debug!(socket = %self.socket.id(), "Connection closed");
    }

    fn absorb(&self, result: Result<(), DispatchError>) -> Result<(), DispatchError> {
        if let Err(e) = &result {
            counter!(DISPATCH_ERRORS_TOTAL, "kind" => e.kind()).increment(1);
        }
        match result {
            Err(e) if e.is_fatal() => {
                error!(socket = %self.socket.id(), error = %e, "Fatal dispatch error");
                Err(e)
            }
            Err(e) => {
                debug!(socket = %self.socket.id(), error = %e, "Message ignored");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
