//! Request DTOs with garde validation.
//!
//! These structs validate client data before it reaches the conversation
//! controller.

use garde::Validate;
use serde::Deserialize;

use crate::error::ChatError;

/// Validation constants
pub const MAX_MESSAGE_LENGTH: usize = 10000;

fn validate_not_blank(value: &str, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("Message cannot be empty"));
    }
    Ok(())
}

/// Input for opening a conversation or marking it read
#[derive(Debug, Deserialize, Validate)]
#[garde(context(()))]
pub struct OrderRefInput {
    #[garde(range(min = 1))]
    pub order_id: i64,
}

/// Input for sending a message
#[derive(Debug, Deserialize, Validate)]
#[garde(context(()))]
pub struct SendMessageInput {
    #[garde(range(min = 1))]
    pub order_id: i64,
    #[garde(range(min = 1))]
    pub receiver_id: i64,
    #[garde(length(min = 1, max = MAX_MESSAGE_LENGTH), custom(validate_not_blank))]
    pub content: String,
}

/// Input for marking a single message read
#[derive(Debug, Deserialize, Validate)]
#[garde(context(()))]
pub struct MessageRefInput {
    #[garde(range(min = 1))]
    pub message_id: i64,
}

/// Helper trait to convert garde validation errors into [`ChatError`]
pub trait ValidateExt {
    fn validate_input(&self) -> Result<(), ChatError>;
}

impl<T: Validate<Context = ()>> ValidateExt for T {
    fn validate_input(&self) -> Result<(), ChatError> {
        self.validate()
            .map_err(|e| ChatError::Validation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_send_message_input_accepts_regular_text() {
        let input = SendMessageInput {
            order_id: 1,
            receiver_id: 2,
            content: "Can you ship by Friday?".to_string(),
        };
        assert!(input.validate_input().is_ok());
    }

    #[test]
    fn test_send_message_input_rejects_blank_content() {
        let input = SendMessageInput {
            order_id: 1,
            receiver_id: 2,
            content: "   \n\t".to_string(),
        };
        let err = input.validate_input().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_send_message_input_rejects_oversized_content() {
        let input = SendMessageInput {
            order_id: 1,
            receiver_id: 2,
            content: "x".repeat(MAX_MESSAGE_LENGTH + 1),
        };
        assert!(input.validate_input().is_err());
    }

    #[test]
    fn test_ids_must_be_positive() {
        assert!(OrderRefInput { order_id: 0 }.validate_input().is_err());
        assert!(OrderRefInput { order_id: -4 }.validate_input().is_err());
        assert!(OrderRefInput { order_id: 4 }.validate_input().is_ok());
        assert!(MessageRefInput { message_id: 0 }.validate_input().is_err());
    }
}
