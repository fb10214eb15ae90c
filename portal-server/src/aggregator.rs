use std::sync::Arc;

use crate::directory::OrderDirectory;
use crate::error::ChatError;
use crate::models::{Conversation, User};
use crate::store::MessageStore;

/// Derives one [`Conversation`] per order the viewer takes part in.
///
/// Pure read: nothing is written while aggregating.
pub struct ChatAggregator {
    store: Arc<MessageStore>,
    directory: Arc<dyn OrderDirectory>,
}

impl ChatAggregator {
    pub fn new(store: Arc<MessageStore>, directory: Arc<dyn OrderDirectory>) -> Self {
        Self { store, directory }
    }

    /// Orders without a resolvable counterpart are skipped. Orders with a
    /// counterpart but no messages yet still produce an entry. The result is
    /// in no particular order; see [`sort_by_recent`].
    pub async fn list_conversations(&self, viewer: &User) -> Result<Vec<Conversation>, ChatError> {
        let orders = self
            .directory
            .list_orders_for_user(viewer.id, viewer.role)
            .await?;

        let mut conversations = Vec::with_capacity(orders.len());
        for order in orders {
            let counterpart = match order.counterpart_for(viewer) {
                Ok(Some(counterpart)) => counterpart,
                Ok(None) | Err(_) => continue,
            };
            let (order_id, viewer_id) = (order.id, viewer.id);
            let activity = self
                .store
                .blocking(move |store| store.activity(order_id, viewer_id))
                .await?;
            conversations.push(Conversation {
                order_id: order.id,
                order_title: order.title,
                counterpart_id: counterpart.id,
                counterpart_name: counterpart.name,
                last_message_at: activity.last_message.as_ref().map(|m| m.created_at),
                last_message: activity.last_message.map(|m| m.content),
                unread_count: activity.unread_count,
            });
        }
        Ok(conversations)
    }
}

/// Most recent activity first; conversations without messages last.
pub fn sort_by_recent(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| {
        b.last_message_at
            .cmp(&a.last_message_at)
            .then_with(|| b.order_id.cmp(&a.order_id))
    });
}

pub fn total_unread(conversations: &[Conversation]) -> u64 {
    conversations.iter().map(|c| c.unread_count).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectorySeed, InMemoryDirectory};
    use crate::error::{DirectoryError, ErrorKind};
    use crate::models::{Order, OrderId, Role, UserId};
    use async_trait::async_trait;

    const BUYER: UserId = 10;
    const SUPPLIER: UserId = 20;

    fn user(id: UserId, role: Role) -> User {
        User {
            id,
            name: format!("user{}", id),
            role,
        }
    }

    fn order(id: OrderId, supplier_id: Option<UserId>) -> Order {
        Order {
            id,
            title: format!("Order {}", id),
            buyer_id: BUYER,
            buyer_name: "Acme".to_string(),
            supplier_id,
            supplier_name: supplier_id.map(|_| "Forge".to_string()),
        }
    }

    fn setup(orders: Vec<Order>) -> (Arc<MessageStore>, ChatAggregator) {
        let store = Arc::new(MessageStore::open_in_memory().unwrap());
        let directory = Arc::new(InMemoryDirectory::from_seed(DirectorySeed {
            users: vec![user(BUYER, Role::Buyer), user(SUPPLIER, Role::Supplier)],
            orders,
        }));
        let aggregator = ChatAggregator::new(store.clone(), directory);
        (store, aggregator)
    }

    #[tokio::test]
    async fn test_unread_counts_per_order() {
        let (store, aggregator) = setup(vec![order(1, Some(SUPPLIER)), order(2, Some(SUPPLIER))]);
        for i in 0..3 {
            store.append(1, SUPPLIER, BUYER, &format!("unread {}", i)).unwrap();
        }
        for i in 0..5 {
            store.append(2, SUPPLIER, BUYER, &format!("read {}", i)).unwrap();
        }
        store.mark_all_read_for_receiver_in_order(2, BUYER).unwrap();

        let mut conversations = aggregator
            .list_conversations(&user(BUYER, Role::Buyer))
            .await
            .unwrap();
        conversations.sort_by_key(|c| c.order_id);

        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations[0].unread_count, 3);
        assert_eq!(conversations[1].unread_count, 0);
        assert_eq!(total_unread(&conversations), 3);
    }

    #[tokio::test]
    async fn test_last_message_and_counterpart() {
        let (store, aggregator) = setup(vec![order(1, Some(SUPPLIER))]);
        store.append(1, BUYER, SUPPLIER, "first").unwrap();
        let last = store.append(1, SUPPLIER, BUYER, "second").unwrap();

        let buyer_view = aggregator
            .list_conversations(&user(BUYER, Role::Buyer))
            .await
            .unwrap();
        assert_eq!(buyer_view[0].counterpart_id, SUPPLIER);
        assert_eq!(buyer_view[0].counterpart_name, "Forge");
        assert_eq!(buyer_view[0].order_title, "Order 1");
        assert_eq!(buyer_view[0].last_message.as_deref(), Some("second"));
        assert_eq!(buyer_view[0].last_message_at, Some(last.created_at));

        let supplier_view = aggregator
            .list_conversations(&user(SUPPLIER, Role::Supplier))
            .await
            .unwrap();
        assert_eq!(supplier_view[0].counterpart_id, BUYER);
        assert_eq!(supplier_view[0].counterpart_name, "Acme");
        // "first" is addressed to the supplier and still unread
        assert_eq!(supplier_view[0].unread_count, 1);
    }

    #[tokio::test]
    async fn test_bound_order_without_messages_still_listed() {
        let (_store, aggregator) = setup(vec![order(1, Some(SUPPLIER)), order(2, None)]);

        let conversations = aggregator
            .list_conversations(&user(BUYER, Role::Buyer))
            .await
            .unwrap();

        // Order 2 has nobody on the other side yet
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].order_id, 1);
        assert!(conversations[0].last_message.is_none());
        assert!(conversations[0].last_message_at.is_none());
        assert_eq!(conversations[0].unread_count, 0);
    }

    #[test]
    fn test_sort_by_recent() {
        let conv = |order_id, at: Option<i64>| Conversation {
            order_id,
            order_title: String::new(),
            counterpart_id: 1,
            counterpart_name: String::new(),
            last_message: at.map(|_| "x".to_string()),
            last_message_at: at,
            unread_count: 0,
        };
        let mut list = vec![conv(1, Some(100)), conv(2, None), conv(3, Some(300))];
        sort_by_recent(&mut list);
        let ids: Vec<_> = list.iter().map(|c| c.order_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    struct DownDirectory;

    #[async_trait]
    impl OrderDirectory for DownDirectory {
        async fn get_order(&self, _: OrderId) -> Result<Order, DirectoryError> {
            Err(DirectoryError::Unavailable("down".to_string()))
        }
        async fn respond(&self, _: OrderId, _: &User) -> Result<Order, DirectoryError> {
            Err(DirectoryError::Unavailable("down".to_string()))
        }
        async fn list_orders_for_user(
            &self,
            _: UserId,
            _: Role,
        ) -> Result<Vec<Order>, DirectoryError> {
            Err(DirectoryError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_directory_outage_is_dependency_error() {
        let store = Arc::new(MessageStore::open_in_memory().unwrap());
        let aggregator = ChatAggregator::new(store, Arc::new(DownDirectory));
        let err = aggregator
            .list_conversations(&user(BUYER, Role::Buyer))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dependency);
    }
}
