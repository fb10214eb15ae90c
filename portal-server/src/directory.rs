//! Order directory and identity provider contracts.
//!
//! The messaging core only reaches orders and users through these traits.
//! [`InMemoryDirectory`] backs the standalone server and the tests.

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::DirectoryError;
use crate::models::{Order, OrderId, Role, User, UserId};

#[async_trait]
pub trait OrderDirectory: Send + Sync {
    async fn get_order(&self, order_id: OrderId) -> Result<Order, DirectoryError>;

    /// Bind `supplier` to the order. Fails with
    /// [`DirectoryError::AlreadyBound`] when a supplier is already set.
    async fn respond(&self, order_id: OrderId, supplier: &User) -> Result<Order, DirectoryError>;

    /// Orders where the user is the buyer, or the bound supplier.
    async fn list_orders_for_user(
        &self,
        user_id: UserId,
        role: Role,
    ) -> Result<Vec<Order>, DirectoryError>;
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user(&self, user_id: UserId) -> Result<User, DirectoryError>;
}

/// Seed file layout: `{ "users": [...], "orders": [...] }`
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub orders: Vec<Order>,
}

pub struct InMemoryDirectory {
    users: DashMap<UserId, User>,
    orders: DashMap<OrderId, Order>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            orders: DashMap::new(),
        }
    }

    pub fn from_seed(seed: DirectorySeed) -> Self {
        let directory = Self::new();
        for user in seed.users {
            directory.insert_user(user);
        }
        for order in seed.orders {
            directory.insert_order(order);
        }
        directory
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read seed {}: {}", path.display(), e))?;
        let seed: DirectorySeed = serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse seed {}: {}", path.display(), e))?;
        info!(
            users = seed.users.len(),
            orders = seed.orders.len(),
            "Loaded directory seed"
        );
        Ok(Self::from_seed(seed))
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn insert_order(&self, order: Order) {
        self.orders.insert(order.id, order);
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderDirectory for InMemoryDirectory {
    async fn get_order(&self, order_id: OrderId) -> Result<Order, DirectoryError> {
        self.orders
            .get(&order_id)
            .map(|order| order.clone())
            .ok_or(DirectoryError::NotFound {
                entity: "order",
                id: order_id,
            })
    }

    async fn respond(&self, order_id: OrderId, supplier: &User) -> Result<Order, DirectoryError> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or(DirectoryError::NotFound {
                entity: "order",
                id: order_id,
            })?;

        if let Some(supplier_id) = order.supplier_id {
            return Err(DirectoryError::AlreadyBound { supplier_id });
        }

        order.supplier_id = Some(supplier.id);
        order.supplier_name = Some(supplier.name.clone());
        info!(order_id, supplier_id = supplier.id, "Supplier bound to order");
        Ok(order.clone())
    }

    async fn list_orders_for_user(
        &self,
        user_id: UserId,
        role: Role,
    ) -> Result<Vec<Order>, DirectoryError> {
        let orders = self
            .orders
            .iter()
            .filter(|entry| match role {
                Role::Supplier => entry.supplier_id == Some(user_id),
                Role::Buyer | Role::Admin => entry.buyer_id == user_id,
            })
            .map(|entry| entry.value().clone())
            .collect();
        Ok(orders)
    }
}

#[async_trait]
impl IdentityProvider for InMemoryDirectory {
    async fn current_user(&self, user_id: UserId) -> Result<User, DirectoryError> {
        self.users
            .get(&user_id)
            .map(|user| user.clone())
            .ok_or(DirectoryError::NotFound {
                entity: "user",
                id: user_id,
            })
    }
}
