//! Per-connection conversation controller.
//!
//! A [`ConversationSession`] is the read/write gateway for one viewer. It
//! owns two latches:
//!
//! - a read latch per order, holding the newest unread message id that was
//!   already covered by a bulk mark-read, so repeated polls of the same state
//!   do not issue redundant writes;
//! - a respond latch per order, so a supplier's first reply binds them to the
//!   order once and later replies do not call the directory again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{ChatError, DirectoryError};
use crate::models::{
    ConversationView, Message, MessageId, Order, OrderId, Participant, Role, User, UserId,
};
use crate::service::ChatService;

/// Notice for the counterpart that some of their messages were read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub order_id: OrderId,
    pub reader_id: UserId,
    pub counterpart_id: Option<UserId>,
    pub message_ids: Vec<MessageId>,
}

pub struct ConversationSession {
    service: Arc<ChatService>,
    viewer: User,
    read_latches: HashMap<OrderId, MessageId>,
    responded: HashSet<OrderId>,
}

impl ConversationSession {
    pub fn new(service: Arc<ChatService>, viewer: User) -> Self {
        Self {
            service,
            viewer,
            read_latches: HashMap::new(),
            responded: HashSet::new(),
        }
    }

    pub fn viewer(&self) -> &User {
        &self.viewer
    }

    /// Load the order and make sure the viewer belongs to its conversation.
    /// Runs before any message store access.
    async fn authorize(
        &self,
        order_id: OrderId,
    ) -> Result<(Order, Option<Participant>), ChatError> {
        let order = self.service.directory().get_order(order_id).await?;
        let counterpart = order.counterpart_for(&self.viewer)?;
        Ok((order, counterpart))
    }

    /// Messages of one order, oldest first.
    ///
    /// When messages addressed to the viewer are unread and the read latch
    /// has not yet covered them, all of them are marked read in one go and
    /// the returned view reflects the new `read_at`.
    pub async fn open(
        &mut self,
        order_id: OrderId,
    ) -> Result<(ConversationView, Option<ReadReceipt>), ChatError> {
        let (_, counterpart) = self.authorize(order_id).await?;
        let mut messages = self
            .service
            .store()
            .blocking(move |store| store.list_by_order(order_id))
            .await?;

        let newest_unread = messages
            .iter()
            .filter(|m| m.is_unread_by(self.viewer.id))
            .map(|m| m.id)
            .max();

        let mut receipt = None;
        let mut marked_count = 0;
        if let Some(newest) = newest_unread {
            let latched = self.read_latches.get(&order_id).copied();
            if latched.map_or(true, |watermark| newest > watermark) {
                let viewer_id = self.viewer.id;
                let marked = self
                    .service
                    .store()
                    .blocking(move |store| {
                        store.mark_all_read_for_receiver_in_order(order_id, viewer_id)
                    })
                    .await?;
                self.read_latches.insert(order_id, newest);

                for message in messages.iter_mut() {
                    if message.read_at.is_none() && marked.message_ids.contains(&message.id) {
                        message.read_at = Some(marked.read_at);
                    }
                }
                marked_count = marked.count();
                if marked_count > 0 {
                    receipt = Some(ReadReceipt {
                        order_id,
                        reader_id: self.viewer.id,
                        counterpart_id: counterpart.as_ref().map(|c| c.id),
                        message_ids: marked.message_ids,
                    });
                }
            } else {
                debug!(order_id, viewer = self.viewer.id, "Read latch held, skipping mark");
            }
        }

        let view = ConversationView {
            order_id,
            counterpart,
            messages,
            marked_count,
        };
        Ok((view, receipt))
    }

    /// Forget the read latch for an order the viewer navigated away from.
    pub fn close(&mut self, order_id: OrderId) {
        self.read_latches.remove(&order_id);
    }

    /// Send a message from the viewer to the order's counterpart.
    ///
    /// A supplier writing on an order without a bound supplier is bound to it
    /// first. If the directory cannot be reached the send is aborted and
    /// nothing is stored.
    pub async fn send(
        &mut self,
        order_id: OrderId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<Message, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::validation("Message cannot be empty"));
        }
        if receiver_id == self.viewer.id {
            return Err(ChatError::validation("Cannot send a message to yourself"));
        }

        let (order, counterpart) = self.authorize(order_id).await?;
        let counterpart = counterpart.ok_or_else(|| {
            ChatError::validation(format!("order {} has no supplier to message yet", order_id))
        })?;
        if counterpart.id != receiver_id {
            return Err(ChatError::authorization(format!(
                "user {} is not a participant of order {}",
                receiver_id, order_id
            )));
        }

        if self.viewer.role == Role::Supplier
            && !order.has_bound_supplier()
            && !self.responded.contains(&order_id)
        {
            self.respond(order_id).await?;
        }

        let (sender_id, content) = (self.viewer.id, content.to_string());
        self.service
            .store()
            .blocking(move |store| store.append(order_id, sender_id, receiver_id, &content))
            .await
    }

    async fn respond(&mut self, order_id: OrderId) -> Result<(), ChatError> {
        match self.service.directory().respond(order_id, &self.viewer).await {
            Ok(_) => {
                info!(order_id, supplier_id = self.viewer.id, "Supplier responded to order");
            }
            Err(DirectoryError::AlreadyBound { supplier_id }) if supplier_id == self.viewer.id => {
                debug!(order_id, supplier_id, "Order already bound to this supplier");
            }
            Err(e) => {
                warn!(order_id, supplier_id = self.viewer.id, error = %e, "Respond failed");
                return Err(e.into());
            }
        }
        self.responded.insert(order_id);
        Ok(())
    }

    /// Mark everything addressed to the viewer in one order as read.
    pub async fn mark_all_read(&mut self, order_id: OrderId) -> Result<ReadReceipt, ChatError> {
        let (_, counterpart) = self.authorize(order_id).await?;
        let viewer_id = self.viewer.id;
        let marked = self
            .service
            .store()
            .blocking(move |store| store.mark_all_read_for_receiver_in_order(order_id, viewer_id))
            .await?;
        Ok(ReadReceipt {
            order_id,
            reader_id: self.viewer.id,
            counterpart_id: counterpart.map(|c| c.id),
            message_ids: marked.message_ids,
        })
    }

    /// Mark a single message read. Only its receiver may do so.
    pub async fn mark_read(
        &mut self,
        message_id: MessageId,
    ) -> Result<(Message, Option<ReadReceipt>), ChatError> {
        let store = self.service.store();
        // The order, and so the participants, is only known from the message
        let existing = store
            .blocking(move |store| store.get(message_id))
            .await?
            .ok_or_else(|| ChatError::validation(format!("message {} not found", message_id)))?;
        if existing.receiver_id != self.viewer.id {
            return Err(ChatError::authorization(format!(
                "message {} is not addressed to user {}",
                message_id, self.viewer.id
            )));
        }

        let message = store
            .blocking(move |store| store.mark_read(message_id))
            .await?;
        let receipt = existing.read_at.is_none().then(|| ReadReceipt {
            order_id: message.order_id,
            reader_id: self.viewer.id,
            counterpart_id: Some(message.sender_id),
            message_ids: vec![message.id],
        });
        Ok((message, receipt))
    }
}
