//! Client side of the portal's order messaging.
//!
//! [`PortalClient`] talks to the messaging server; [`BadgeController`] keeps
//! the unread badge fresh and [`ConversationFeed`] keeps an open conversation
//! fresh.

pub mod badge;
pub mod client;
pub mod config;
pub mod error;
pub mod feed;

pub use badge::{
    badge_label, BadgeController, BadgeHandle, BadgeState, RefreshTrigger, SummarySource,
};
pub use client::PortalClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use feed::{ConversationFeed, ConversationSource, FeedState};
