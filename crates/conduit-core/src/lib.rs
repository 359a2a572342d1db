//! # conduit-core
//!
//! Channel multiplexing core for the Conduit realtime engine.
//!
//! This crate provides the transport-independent building blocks:
//!
//! - **Channel** - The handler contract (`join` / `leave` / `event` / `info`)
//! - **Registry** - Channel name to handler mapping, resolved once
//! - **Socket** - Per-connection state and queued side effects
//! - **Dispatcher** - Authorization state machine and effect delivery
//! - **PubSub** - Topic fan-out shared by all connections
//! - **Connection** / **Endpoint** - What transports plug into
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│ Connection  │────▶│ Dispatcher  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                                   │       │
//!        │            ┌─────────────┐        │       ▼
//!        └────Sink────│   PubSub    │◀───────┘  ChannelHandler
//!                     └─────────────┘
//! ```

pub mod channel;
pub mod connection;
pub mod dispatcher;
pub mod endpoint;
pub mod pubsub;
pub mod registry;
pub mod sink;
pub mod socket;
pub mod topic;

pub use channel::{ChannelHandler, HandlerError, HandlerResult, JoinOutcome};
pub use connection::{Connection, DISPATCH_ERRORS_TOTAL};
pub use dispatcher::{DispatchError, Dispatcher};
pub use endpoint::Endpoint;
pub use pubsub::{PubSub, PubSubStats};
pub use registry::{ChannelRegistry, RegistryError};
pub use sink::{QueueSink, Sink, SinkError, DEFAULT_SINK_CAPACITY};
pub use socket::{Effect, Socket, SocketId};
pub use topic::ChannelTopic;
