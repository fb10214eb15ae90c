use serde::{Deserialize, Serialize};

use super::message::Message;
use super::order::OrderId;
use super::user::UserId;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: UserId,
    pub name: String,
}

/// Per-viewer, per-order summary. Derived on every query, never stored.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub order_id: OrderId,
    pub order_title: String,
    pub counterpart_id: UserId,
    pub counterpart_name: String,
    pub last_message: Option<String>,
    pub last_message_at: Option<i64>,
    pub unread_count: u64,
}

/// Result of opening a conversation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ConversationView {
    pub order_id: OrderId,
    pub counterpart: Option<Participant>,
    pub messages: Vec<Message>,
    /// Messages this open transitioned to read.
    pub marked_count: usize,
}
