//! Received-text history entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::identity::DeviceId;

/// One accepted inbound message.  Entries are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sender_id: DeviceId,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Creates an entry stamped with the current time.
    pub fn now(sender_id: DeviceId, text: impl Into<String>) -> Self {
        Self {
            sender_id,
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}
