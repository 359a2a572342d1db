//! Delivery sinks.
//!
//! A sink is the only thing the core knows about a transport: it accepts one
//! encoded message at a time and may fail if the connection is gone.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

/// Default outbound queue capacity per connection.
pub const DEFAULT_SINK_CAPACITY: usize = 1024;

/// Sink delivery errors.
///
/// Callers treat these as silent drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The owning connection is gone.
    #[error("Sink closed")]
    Closed,

    /// The outbound queue is full.
    #[error("Sink full")]
    Full,
}

/// Per-connection delivery handle.
pub trait Sink: Send + Sync {
    /// Deliver one encoded message.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame could not be queued. The core never
    /// propagates it.
    fn deliver(&self, frame: &str) -> Result<(), SinkError>;
}

/// A sink backed by a bounded tokio channel.
///
/// The receiving half is drained by the transport: written to the socket by
/// the duplex adapter, or handed out on fetch by the long-polling adapter.
#[derive(Debug, Clone)]
pub struct QueueSink {
    tx: mpsc::Sender<String>,
}

impl QueueSink {
    /// Create a sink with the given queue capacity.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Check if the receiving half has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Sink for QueueSink {
    fn deliver(&self, frame: &str) -> Result<(), SinkError> {
        self.tx.try_send(frame.to_owned()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!("Outbound queue full, dropping frame");
                SinkError::Full
            }
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}
