//! # conduit-transport
//!
//! Transport adapters for the Conduit channel engine.
//!
//! Both adapters drive the same `conduit-core` dispatch; they only differ in
//! how frames move:
//!
//! - **Duplex** - A persistent connection; frames flow both ways as they are produced
//! - **Long polling** - The client fetches buffered frames and submits batches
//!
//! ## Duplex Abstraction
//!
//! Any persistent connection implementing [`DuplexConnection`] can be served
//! with [`run_duplex`]:
//!
//! ```rust,ignore
//! use conduit_transport::{run_duplex, DuplexConfig, DuplexConnection};
//!
//! async fn handle(mut conn: impl DuplexConnection, endpoint: conduit_core::Endpoint) {
//!     let reason = run_duplex(&mut conn, &endpoint, &DuplexConfig::default()).await;
//!     tracing::debug!(?reason, "disconnected");
//! }
//! ```

pub mod duplex;
pub mod longpoll;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use duplex::{run_duplex, serve, Disconnect, DuplexConfig};
pub use longpoll::{LongPoll, LongPollConfig, PollError};
pub use traits::{DuplexConnection, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketConnection, WebSocketTransport};
