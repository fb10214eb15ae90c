use serde::{Deserialize, Serialize};

use super::order::OrderId;
use super::user::UserId;

/// Store-assigned, strictly increasing message identifier.
pub type MessageId = i64;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub order_id: OrderId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    /// Server clock, UTC milliseconds.
    pub created_at: i64,
    /// Set once when the receiver reads the message, never cleared.
    pub read_at: Option<i64>,
}

impl Message {
    pub fn is_unread_by(&self, viewer_id: UserId) -> bool {
        self.receiver_id == viewer_id && self.read_at.is_none()
    }
}
