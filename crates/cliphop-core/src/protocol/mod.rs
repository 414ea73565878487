//! Protocol module containing the message type and the JSON codec.

pub mod codec;
pub mod message;

pub use codec::{
    decode_message, decode_message_with_limit, encode_message, encode_message_with_limit,
    ProtocolError,
};
pub use message::{Message, MAX_PAYLOAD_BYTES};
