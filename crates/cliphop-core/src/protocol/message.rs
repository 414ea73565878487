//! The single message type exchanged between nodes.
//!
//! There is no handshake, acknowledgement, or response: a sender opens a TCP
//! connection, writes one [`Message`], and closes.  The close is the
//! end-of-message marker.

use serde::{Deserialize, Serialize};

use crate::domain::identity::DeviceId;

/// Upper bound on an encoded message, in bytes (1 MiB).
///
/// The listener never buffers more than this plus one byte per connection.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Clipboard text sent from one node to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Identity of the sending node.
    pub sender_id: DeviceId,
    /// Clipboard contents.
    pub text: String,
}

impl Message {
    pub fn new(sender_id: DeviceId, text: impl Into<String>) -> Self {
        Self {
            sender_id,
            text: text.into(),
        }
    }
}
