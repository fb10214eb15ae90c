//! Live view of one open conversation.
//!
//! While open, the feed reloads the conversation on a fixed cadence and on
//! demand. Every load goes through the server's `get_conversation`, which
//! also marks the viewer's unread messages read, so a load that marked
//! something nudges the unread badge.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use portal_server::models::{ConversationView, Message, OrderId, UserId};
use portal_server::{ErrorKind, WsMessage};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::badge::{BadgeHandle, RefreshTrigger};
use crate::client::PortalClient;
use crate::error::ClientError;

#[async_trait]
pub trait ConversationSource: Send + Sync + 'static {
    async fn load_conversation(&self, order_id: OrderId) -> Result<ConversationView, ClientError>;

    async fn post_message(
        &self,
        order_id: OrderId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<Message, ClientError>;

    async fn leave_conversation(&self, order_id: OrderId) -> Result<(), ClientError>;
}

#[async_trait]
impl ConversationSource for PortalClient {
    async fn load_conversation(&self, order_id: OrderId) -> Result<ConversationView, ClientError> {
        self.conversation(order_id).await
    }

    async fn post_message(
        &self,
        order_id: OrderId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<Message, ClientError> {
        self.send_message(order_id, receiver_id, content).await
    }

    async fn leave_conversation(&self, order_id: OrderId) -> Result<(), ClientError> {
        self.close_conversation(order_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedState {
    /// Last successfully loaded view
    pub view: Option<ConversationView>,
    pub revision: u64,
    pub last_error: Option<ClientError>,
}

pub struct ConversationFeed<S: ConversationSource> {
    order_id: OrderId,
    source: Arc<S>,
    badge: Option<BadgeHandle>,
    refresh_tx: mpsc::UnboundedSender<()>,
    state: watch::Receiver<FeedState>,
    task: JoinHandle<()>,
}

impl<S: ConversationSource> ConversationFeed<S> {
    /// Open `order_id` and keep it fresh every `interval`. The first load
    /// runs immediately.
    pub fn open(
        source: Arc<S>,
        order_id: OrderId,
        interval: Duration,
        badge: Option<BadgeHandle>,
    ) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(FeedState::default());
        let interval = interval.max(Duration::from_millis(1));

        info!(order_id, "Opening conversation feed");
        let task = tokio::spawn(run(
            source.clone(),
            order_id,
            interval,
            refresh_rx,
            state_tx,
            badge.clone(),
        ));

        Self {
            order_id,
            source,
            badge,
            refresh_tx,
            state: state_rx,
            task,
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn state(&self) -> FeedState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.state.clone()
    }

    pub fn refresh(&self) {
        let _ = self.refresh_tx.send(());
    }

    fn counterpart_id(&self) -> Option<UserId> {
        self.state
            .borrow()
            .view
            .as_ref()
            .and_then(|view| view.counterpart.as_ref())
            .map(|counterpart| counterpart.id)
    }

    /// Send to the conversation's counterpart, then reload the feed and the
    /// badge without waiting for the next tick.
    pub async fn send(&self, content: &str) -> Result<Message, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::rejected(ErrorKind::Validation, "Message cannot be empty"));
        }
        let receiver_id = self.counterpart_id().ok_or_else(|| {
            ClientError::rejected(
                ErrorKind::Validation,
                format!("order {} has nobody to message yet", self.order_id),
            )
        })?;

        let message = self
            .source
            .post_message(self.order_id, receiver_id, content)
            .await?;

        self.refresh();
        if let Some(badge) = &self.badge {
            badge.refresh(RefreshTrigger::ConversationChanged);
        }
        Ok(message)
    }

    /// Reload when a push concerns this order
    pub fn follow(&self, mut events: broadcast::Receiver<WsMessage>) -> JoinHandle<()> {
        let order_id = self.order_id;
        let refresh_tx = self.refresh_tx.clone();
        tokio::spawn(async move {
            loop {
                let concerns_order = match events.recv().await {
                    Ok(WsMessage::NewMessage { message }) => message.order_id == order_id,
                    Ok(WsMessage::ReadReceipt { order_id: id, .. }) => id == order_id,
                    Ok(_) => false,
                    Err(broadcast::error::RecvError::Lagged(_)) => true,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if concerns_order && refresh_tx.send(()).is_err() {
                    break;
                }
            }
        })
    }

    /// Stop polling and tell the server the viewer left
    pub async fn close(self) -> Result<(), ClientError> {
        self.task.abort();
        info!(order_id = self.order_id, "Closing conversation feed");
        self.source.leave_conversation(self.order_id).await
    }
}

impl<S: ConversationSource> Drop for ConversationFeed<S> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type Load = (u64, Result<ConversationView, ClientError>);

async fn run<S: ConversationSource>(
    source: Arc<S>,
    order_id: OrderId,
    interval: Duration,
    mut refresh_rx: mpsc::UnboundedReceiver<()>,
    state: watch::Sender<FeedState>,
    badge: Option<BadgeHandle>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Load>();
    let mut issued: u64 = 0;
    let mut applied: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            request = refresh_rx.recv() => {
                if request.is_none() {
                    break;
                }
            }
            Some((seq, result)) = done_rx.recv() => {
                if seq <= applied {
                    debug!(order_id, seq, applied, "Discarding stale conversation load");
                } else {
                    applied = seq;
                    apply(&state, badge.as_ref(), order_id, seq, result);
                }
                continue;
            }
        }

        issued += 1;
        let seq = issued;
        let source = source.clone();
        let done = done_tx.clone();
        tokio::spawn(async move {
            let result = source.load_conversation(order_id).await;
            let _ = done.send((seq, result));
        });
    }
}

fn apply(
    state: &watch::Sender<FeedState>,
    badge: Option<&BadgeHandle>,
    order_id: OrderId,
    seq: u64,
    result: Result<ConversationView, ClientError>,
) {
    match result {
        Ok(view) => {
            if view.marked_count > 0 {
                debug!(order_id, marked = view.marked_count, "Conversation marked messages read");
                if let Some(badge) = badge {
                    badge.refresh(RefreshTrigger::ConversationChanged);
                }
            }
            state.send_modify(|s| {
                s.view = Some(view);
                s.revision = seq;
                s.last_error = None;
            });
        }
        Err(e) => {
            warn!(order_id, seq, error = %e, "Conversation refresh failed, keeping last view");
            state.send_modify(|s| {
                s.revision = seq;
                s.last_error = Some(e);
            });
        }
    }
}
