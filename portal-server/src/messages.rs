use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ErrorKind};
use crate::models::{Conversation, ConversationView, Message, MessageId, OrderId, User, UserId};

/// WebSocket message types (shared between server and client)
///
/// Requests carry a client-chosen `request_id` that is echoed in the reply.
/// Server pushes (`new_message`, `read_receipt`) carry none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "connect")]
    Connect {
        user_id: UserId,
        #[serde(default)]
        token: Option<String>,
    },
    #[serde(rename = "auth_response")]
    AuthResponse {
        success: bool,
        message: String,
        #[serde(default)]
        user: Option<User>,
    },

    // Requests
    #[serde(rename = "get_conversation")]
    GetConversation { request_id: u64, order_id: OrderId },
    #[serde(rename = "close_conversation")]
    CloseConversation { order_id: OrderId },
    #[serde(rename = "send_message")]
    SendMessage {
        request_id: u64,
        order_id: OrderId,
        receiver_id: UserId,
        content: String,
    },
    #[serde(rename = "get_summaries")]
    GetSummaries {
        request_id: u64,
        #[serde(default = "default_include_empty")]
        include_empty: bool,
    },
    #[serde(rename = "mark_all_read")]
    MarkAllRead { request_id: u64, order_id: OrderId },
    #[serde(rename = "mark_read")]
    MarkRead { request_id: u64, message_id: MessageId },

    // Replies
    #[serde(rename = "conversation")]
    Conversation { request_id: u64, view: ConversationView },
    #[serde(rename = "message_sent")]
    MessageSent { request_id: u64, message: Message },
    #[serde(rename = "summaries")]
    Summaries {
        request_id: u64,
        conversations: Vec<Conversation>,
    },
    #[serde(rename = "marked_read")]
    MarkedRead {
        request_id: u64,
        order_id: OrderId,
        marked_count: usize,
    },
    #[serde(rename = "message_read")]
    MessageRead { request_id: u64, message: Message },
    #[serde(rename = "failure")]
    Failure {
        request_id: u64,
        kind: ErrorKind,
        message: String,
    },

    // Server push
    #[serde(rename = "new_message")]
    NewMessage { message: Message },
    #[serde(rename = "read_receipt")]
    ReadReceipt {
        order_id: OrderId,
        reader_id: UserId,
        message_ids: Vec<MessageId>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

fn default_include_empty() -> bool {
    true
}

impl WsMessage {
    pub fn failure(request_id: u64, error: &ChatError) -> Self {
        WsMessage::Failure {
            request_id,
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// Correlation id of a request or reply; `None` for handshake frames and
    /// server pushes.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            WsMessage::GetConversation { request_id, .. }
            | WsMessage::SendMessage { request_id, .. }
            | WsMessage::GetSummaries { request_id, .. }
            | WsMessage::MarkAllRead { request_id, .. }
            | WsMessage::MarkRead { request_id, .. }
            | WsMessage::Conversation { request_id, .. }
            | WsMessage::MessageSent { request_id, .. }
            | WsMessage::Summaries { request_id, .. }
            | WsMessage::MarkedRead { request_id, .. }
            | WsMessage::MessageRead { request_id, .. }
            | WsMessage::Failure { request_id, .. } => Some(*request_id),
            WsMessage::Connect { .. }
            | WsMessage::AuthResponse { .. }
            | WsMessage::CloseConversation { .. }
            | WsMessage::NewMessage { .. }
            | WsMessage::ReadReceipt { .. }
            | WsMessage::Error { .. } => None,
        }
    }

    /// Pushes that may change the receiver's unread counts.
    pub fn affects_unread(&self) -> bool {
        matches!(
            self,
            WsMessage::NewMessage { .. } | WsMessage::ReadReceipt { .. }
        )
    }
}
