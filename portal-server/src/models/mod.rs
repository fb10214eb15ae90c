mod conversation;
pub mod input;
mod message;
mod order;
mod user;

pub use conversation::{Conversation, ConversationView, Participant};
pub use message::{Message, MessageId};
pub use order::{Order, OrderId};
pub use user::{Role, User, UserId};
