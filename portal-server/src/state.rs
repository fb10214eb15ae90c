use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::messages::WsMessage;
use crate::models::UserId;
use crate::service::ChatService;

/// Identifies one registered connection of a user
pub type ConnectionId = u64;

/// Server state: the chat service plus the live connections of each user
pub struct ServerState {
    /// user_id -> sender channels keyed by connection (one per tab)
    pub clients: DashMap<UserId, Vec<(ConnectionId, mpsc::UnboundedSender<String>)>>,
    next_connection: AtomicU64,
    pub service: Arc<ChatService>,
    /// Shared secret every client must present, if set
    pub access_token: Option<String>,
    pub auth_timeout: Duration,
}

impl ServerState {
    pub fn new(service: Arc<ChatService>) -> Self {
        Self {
            clients: DashMap::new(),
            next_connection: AtomicU64::new(1),
            service,
            access_token: None,
            auth_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Register a new client connection (supports multiple connections per user)
    pub fn add_client(
        &self,
        user_id: UserId,
        tx: mpsc::UnboundedSender<String>,
    ) -> ConnectionId {
        let conn_id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.clients.entry(user_id).or_default().push((conn_id, tx));
        conn_id
    }

    /// Unregister one connection of a user, plus any of their channels that
    /// already closed. The user goes once none are left.
    pub fn remove_client(&self, user_id: UserId, conn_id: ConnectionId) {
        self.clients.remove_if_mut(&user_id, |_, channels| {
            channels.retain(|(id, tx)| *id != conn_id && !tx.is_closed());
            channels.is_empty()
        });
    }

    /// Send raw text to a specific user (all of their connections)
    pub fn send_to_user(&self, user_id: UserId, message: &str) -> bool {
        if let Some(channels) = self.clients.get(&user_id) {
            let mut sent = false;
            for (_, tx) in channels.iter() {
                if tx.send(message.to_string()).is_ok() {
                    sent = true;
                }
            }
            sent
        } else {
            false
        }
    }

    /// Push an event to a user if they are connected. Offline users pick the
    /// change up on their next poll.
    pub fn push(&self, user_id: UserId, message: &WsMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => {
                let delivered = self.send_to_user(user_id, &json);
                if !delivered {
                    debug!(user_id, "Push skipped, user offline");
                }
                delivered
            }
            Err(e) => {
                error!(user_id, error = %e, "Failed to serialize push");
                false
            }
        }
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.clients
            .get(&user_id)
            .is_some_and(|channels| !channels.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::store::MessageStore;

    fn state() -> ServerState {
        let directory = Arc::new(InMemoryDirectory::new());
        let store = Arc::new(MessageStore::open_in_memory().unwrap());
        ServerState::new(Arc::new(ChatService::new(store, directory.clone(), directory)))
    }

    #[test]
    fn test_new_server_state() {
        let state = state();
        assert!(state.clients.is_empty());
        assert!(state.access_token.is_none());
    }

    #[test]
    fn test_empty_access_token_disables_check() {
        let state = state().with_access_token(Some(String::new()));
        assert!(state.access_token.is_none());
        let state = state.with_access_token(Some("secret".to_string()));
        assert_eq!(state.access_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_add_and_remove_client() {
        let state = state();
        let (tx, rx) = mpsc::unbounded_channel();

        let conn_id = state.add_client(1, tx);
        assert!(state.is_online(1));

        state.remove_client(1, conn_id);
        assert!(!state.is_online(1));
        assert!(state.clients.is_empty());
        drop(rx);
    }

    #[test]
    fn test_remove_client_while_receiver_still_alive() {
        let state = state();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let first = state.add_client(1, tx1);
        let second = state.add_client(1, tx2);
        assert_ne!(first, second);

        // The send task of the first tab may not have dropped its receiver yet
        state.remove_client(1, first);
        assert_eq!(state.clients.get(&1).map(|c| c.len()), Some(1));
        assert!(state.send_to_user(1, "second tab"));
        assert_eq!(rx2.try_recv().unwrap(), "second tab");

        state.remove_client(1, second);
        assert!(!state.is_online(1));
        assert!(state.clients.is_empty());
    }

    #[test]
    fn test_send_to_user() {
        let state = state();
        let (tx, mut rx) = mpsc::unbounded_channel();

        state.add_client(1, tx);
        assert!(state.send_to_user(1, "hello"));
        assert_eq!(rx.try_recv().unwrap(), "hello");

        assert!(!state.send_to_user(2, "hello"));
    }

    #[test]
    fn test_push_reaches_every_connection_of_user() {
        let state = state();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();

        // Same buyer in two tabs, plus another user
        state.add_client(1, tx1);
        state.add_client(1, tx2);
        state.add_client(2, tx3);

        let receipt = WsMessage::ReadReceipt {
            order_id: 5,
            reader_id: 2,
            message_ids: vec![1],
        };
        assert!(state.push(1, &receipt));

        for rx in [&mut rx1, &mut rx2] {
            let parsed: WsMessage = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(parsed, receipt);
        }
        assert!(rx3.try_recv().is_err());
        assert!(!state.push(3, &receipt));
    }

    #[test]
    fn test_partial_disconnect() {
        let state = state();
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let first = state.add_client(1, tx1);
        state.add_client(1, tx2);

        drop(rx1);
        state.remove_client(1, first);

        // User should still be online via second connection
        assert!(state.is_online(1));
        assert!(state.send_to_user(1, "still connected"));
        assert_eq!(rx2.try_recv().unwrap(), "still connected");
    }
}
