//! JSON codec for Cliphop messages.
//!
//! Wire format: one UTF-8 JSON object per TCP connection, no length prefix.
//!
//! ```text
//! {"sender_id":"ALPHA","text":"hello"}
//! ```
//!
//! The reader learns the message is complete when the sender closes the
//! connection.  Both directions enforce a size cap so a peer can never make
//! the listener buffer an unbounded payload.

use thiserror::Error;

use crate::protocol::message::{Message, MAX_PAYLOAD_BYTES};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The connection closed without sending any bytes.
    #[error("empty payload")]
    Empty,

    /// The payload exceeds the configured maximum.
    #[error("payload of {size} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// The payload is not valid JSON, or lacks `sender_id` / `text`.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The message could not be serialised.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Message`] using the default [`MAX_PAYLOAD_BYTES`] limit.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the encoded message would
/// not fit in one payload.
///
/// # Examples
///
/// ```rust
/// use cliphop_core::{decode_message, encode_message, DeviceId, Message};
///
/// let msg = Message::new(DeviceId::new("ALPHA"), "hello");
/// let bytes = encode_message(&msg).unwrap();
/// assert_eq!(decode_message(&bytes).unwrap(), msg);
/// ```
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    encode_message_with_limit(msg, MAX_PAYLOAD_BYTES)
}

/// Encodes a [`Message`], rejecting results larger than `max_bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] or [`ProtocolError::Encode`].
pub fn encode_message_with_limit(msg: &Message, max_bytes: usize) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(msg).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    if bytes.len() > max_bytes {
        return Err(ProtocolError::PayloadTooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }
    Ok(bytes)
}

/// Decodes one [`Message`] using the default [`MAX_PAYLOAD_BYTES`] limit.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are empty, oversized, or malformed.
pub fn decode_message(bytes: &[u8]) -> Result<Message, ProtocolError> {
    decode_message_with_limit(bytes, MAX_PAYLOAD_BYTES)
}

/// Decodes one [`Message`] from a complete payload of at most `max_bytes`.
///
/// Unknown JSON fields are ignored so newer senders stay compatible.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are empty, oversized, or malformed.
pub fn decode_message_with_limit(bytes: &[u8], max_bytes: usize) -> Result<Message, ProtocolError> {
    if bytes.is_empty() {
        return Err(ProtocolError::Empty);
    }
    if bytes.len() > max_bytes {
        return Err(ProtocolError::PayloadTooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
