use serde::{Deserialize, Serialize};

use super::conversation::Participant;
use super::user::{Role, User, UserId};
use crate::error::ChatError;

pub type OrderId = i64;

/// Order as seen by the messaging core. Owned by the order directory.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub title: String,
    pub buyer_id: UserId,
    pub buyer_name: String,
    #[serde(default)]
    pub supplier_id: Option<UserId>,
    #[serde(default)]
    pub supplier_name: Option<String>,
}

impl Order {
    pub fn has_bound_supplier(&self) -> bool {
        self.supplier_id.is_some()
    }

    pub fn buyer(&self) -> Participant {
        Participant {
            id: self.buyer_id,
            name: self.buyer_name.clone(),
        }
    }

    pub fn supplier(&self) -> Option<Participant> {
        self.supplier_id.map(|id| Participant {
            id,
            name: self
                .supplier_name
                .clone()
                .unwrap_or_else(|| format!("Supplier {}", id)),
        })
    }

    /// The other side of the conversation for `viewer`, if the viewer may
    /// take part in it at all.
    ///
    /// Buyers talk to the bound supplier. Suppliers talk to the buyer, either
    /// because they are bound or because the order is still open for a
    /// response. `Ok(None)` means the viewer belongs here but nobody is on the
    /// other side yet.
    pub fn counterpart_for(&self, viewer: &User) -> Result<Option<Participant>, ChatError> {
        if viewer.id == self.buyer_id {
            return Ok(self.supplier());
        }
        match self.supplier_id {
            Some(id) if id == viewer.id => Ok(Some(self.buyer())),
            None if viewer.role == Role::Supplier => Ok(Some(self.buyer())),
            _ => Err(ChatError::authorization(format!(
                "user {} is not a participant of order {}",
                viewer.id, self.id
            ))),
        }
    }
}
