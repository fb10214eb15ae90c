//! Order messaging server library
//!
//! Message store, conversation aggregation and the per-connection session
//! logic, exposed for the binary and for integration tests.

pub mod aggregator;
pub mod config;
mod connection;
pub mod conversation;
pub mod directory;
pub mod error;
pub mod messages;
pub mod models;
pub mod service;
mod state;
pub mod store;

pub use config::ServerConfig;
pub use connection::handle_connection;
pub use connection::handle_message;
pub use directory::{DirectorySeed, IdentityProvider, InMemoryDirectory, OrderDirectory};
pub use error::{ChatError, DirectoryError, ErrorKind};
pub use messages::WsMessage;
pub use service::ChatService;
pub use state::ServerState;
pub use store::MessageStore;
