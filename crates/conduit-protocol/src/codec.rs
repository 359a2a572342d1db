//! JSON codec for Conduit messages.
//!
//! One JSON object per message. This module is the only place that knows the
//! wire format; everything else works with [`Message`] values.

use serde_json::Value;
use thiserror::Error;

use crate::message::Message;

/// Maximum encoded frame size accepted by the decoder (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Frame is not a well-formed message.
    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Malformed(err.to_string())
    }
}

/// Encode a message to its JSON text form.
#[must_use]
pub fn encode(message: &Message) -> String {
    message.to_value().to_string()
}

/// Decode a message from JSON text.
///
/// `message` defaults to an empty object when absent or `null`.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the text is not a JSON object with
/// string `channel`, `topic` and `event` fields, or
/// [`ProtocolError::FrameTooLarge`] if it exceeds [`MAX_FRAME_SIZE`].
pub fn decode(data: &str) -> Result<Message, ProtocolError> {
    check_size(data)?;
    decode_value(serde_json::from_str(data)?)
}

/// Decode a message from an already parsed JSON value.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the value is not a valid message.
pub fn decode_value(value: Value) -> Result<Message, ProtocolError> {
    if !value.is_object() {
        return Err(ProtocolError::Malformed("expected a JSON object".into()));
    }
    Ok(serde_json::from_value(value)?)
}

/// Decode a JSON array of messages.
///
/// The outer array must be valid; each element is decoded independently so a
/// single bad element can be dropped without rejecting the batch.
///
/// # Errors
///
/// Returns an error if the text is too large or is not a JSON array.
pub fn decode_batch(data: &str) -> Result<Vec<Result<Message, ProtocolError>>, ProtocolError> {
    check_size(data)?;
    match serde_json::from_str::<Value>(data)? {
        Value::Array(items) => Ok(items.into_iter().map(decode_value).collect()),
        _ => Err(ProtocolError::Malformed("expected a JSON array".into())),
    }
}

/// Encode a batch of already encoded frames as a JSON array.
#[must_use]
pub fn encode_batch<S: AsRef<str>>(frames: &[S]) -> String {
    let len = frames.iter().map(|f| f.as_ref().len() + 1).sum::<usize>() + 2;
    let mut out = String::with_capacity(len);
    out.push('[');
    for (i, frame) in frames.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(frame.as_ref());
    }
    out.push(']');
    out
}

fn check_size(data: &str) -> Result<(), ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }
    Ok(())
}
