//! Error taxonomy for the messaging subsystem.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::UserId;

/// Errors surfaced by the chat core. Every failure path is observable by the
/// caller; none of these are fatal to the rest of the portal.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Empty content, self-addressed message, unknown or malformed ids.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Order directory or identity provider unreachable or erroring.
    #[error("dependency unavailable: {0}")]
    Dependency(String),
    /// Message store failure.
    #[error("message store failure: {0}")]
    Storage(String),
    /// Viewer is not a participant of the conversation.
    #[error("not authorized: {0}")]
    Authorization(String),
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Validation(_) => ErrorKind::Validation,
            ChatError::Dependency(_) => ErrorKind::Dependency,
            ChatError::Storage(_) => ErrorKind::Storage,
            ChatError::Authorization(_) => ErrorKind::Authorization,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        ChatError::Authorization(message.into())
    }
}

/// Wire representation of a [`ChatError`] discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Dependency,
    Storage,
    Authorization,
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        ChatError::Storage(e.to_string())
    }
}

/// Failures reported by the order directory and identity provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("order already bound to supplier {supplier_id}")]
    AlreadyBound { supplier_id: UserId },
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

impl From<DirectoryError> for ChatError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::NotFound { .. } => ChatError::Validation(e.to_string()),
            DirectoryError::AlreadyBound { .. } => ChatError::Authorization(e.to_string()),
            DirectoryError::Unavailable(_) => ChatError::Dependency(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_errors_map_to_taxonomy() {
        let not_found: ChatError = DirectoryError::NotFound { entity: "order", id: 7 }.into();
        assert_eq!(not_found.kind(), ErrorKind::Validation);
        assert!(not_found.to_string().contains("order 7 not found"));

        let bound: ChatError = DirectoryError::AlreadyBound { supplier_id: 3 }.into();
        assert_eq!(bound.kind(), ErrorKind::Authorization);

        let down: ChatError = DirectoryError::Unavailable("timeout".to_string()).into();
        assert_eq!(down.kind(), ErrorKind::Dependency);
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::Authorization).unwrap();
        assert_eq!(json, "\"authorization\"");
        let parsed: ErrorKind = serde_json::from_str("\"storage\"").unwrap();
        assert_eq!(parsed, ErrorKind::Storage);
    }
}
