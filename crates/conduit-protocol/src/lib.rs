//! # conduit-protocol
//!
//! Wire message definitions for the Conduit channel engine.
//!
//! Every transport exchanges the same JSON object:
//!
//! ```text
//! { "channel": string, "topic": string, "event": string, "message": object }
//! ```
//!
//! ## Reserved values
//!
//! - channel `phoenix` + event `heartbeat` - keepalive, echoed on topic `conn`
//! - event `join` / `leave` - topic lifecycle, intercepted by the dispatcher
//!
//! ## Example
//!
//! ```rust
//! use conduit_protocol::{codec, Message, Payload};
//!
//! let message = Message::new("rooms", "lobby", "join", Payload::new());
//!
//! let encoded = codec::encode(&message);
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(message, decoded);
//! ```

pub mod codec;
pub mod message;

pub use codec::{decode, encode, ProtocolError};
pub use message::{
    Message, Payload, CONN_TOPIC, HEARTBEAT_EVENT, JOIN_EVENT, LEAVE_EVENT, PHOENIX_CHANNEL,
};
