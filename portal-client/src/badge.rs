//! Unread badge for the signed-in user.
//!
//! [`BadgeController`] re-aggregates the user's conversation summaries on a
//! fixed interval and whenever something that may change unread counts
//! happens (focus, navigation, an open or send in a conversation, a server
//! push). Refreshes may overlap; each one is numbered and a result older
//! than the newest applied one is dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use portal_server::aggregator::total_unread;
use portal_server::models::Conversation;
use portal_server::WsMessage;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::client::PortalClient;
use crate::error::ClientError;

/// Largest count shown verbatim
pub const MAX_BADGE_COUNT: u64 = 99;

/// Text of the badge, or `None` when no badge should be shown
pub fn badge_label(total_unread: u64) -> Option<String> {
    match total_unread {
        0 => None,
        n if n <= MAX_BADGE_COUNT => Some(n.to_string()),
        _ => Some(format!("{}+", MAX_BADGE_COUNT)),
    }
}

#[async_trait]
pub trait SummarySource: Send + Sync + 'static {
    async fn fetch_summaries(&self) -> Result<Vec<Conversation>, ClientError>;
}

#[async_trait]
impl SummarySource for PortalClient {
    async fn fetch_summaries(&self) -> Result<Vec<Conversation>, ClientError> {
        // Conversations without messages never add to the count
        self.conversation_summaries(false).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Interval,
    FocusRegained,
    Navigated,
    ConversationChanged,
    PushEvent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BadgeState {
    pub total_unread: u64,
    pub label: Option<String>,
    /// Sequence number of the refresh this state reflects, 0 before the first
    pub revision: u64,
    /// Error of the newest refresh if it failed; the count is the last good one
    pub last_error: Option<ClientError>,
}

/// Clonable trigger side of a [`BadgeController`]
#[derive(Debug, Clone)]
pub struct BadgeHandle {
    triggers: mpsc::UnboundedSender<RefreshTrigger>,
}

impl BadgeHandle {
    pub fn refresh(&self, trigger: RefreshTrigger) {
        if self.triggers.send(trigger).is_err() {
            debug!(?trigger, "Badge controller stopped, trigger dropped");
        }
    }

    fn is_closed(&self) -> bool {
        self.triggers.is_closed()
    }
}

pub struct BadgeController {
    handle: BadgeHandle,
    state: watch::Receiver<BadgeState>,
    task: JoinHandle<()>,
}

impl BadgeController {
    /// Start the refresh loop. The first refresh runs immediately.
    pub fn spawn<S: SummarySource>(source: Arc<S>, interval: Duration) -> Self {
        let (triggers_tx, triggers_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(BadgeState::default());
        let interval = interval.max(Duration::from_millis(1));
        let task = tokio::spawn(run(source, interval, triggers_rx, state_tx));

        Self {
            handle: BadgeHandle {
                triggers: triggers_tx,
            },
            state: state_rx,
            task,
        }
    }

    pub fn handle(&self) -> BadgeHandle {
        self.handle.clone()
    }

    pub fn focus_regained(&self) {
        self.handle.refresh(RefreshTrigger::FocusRegained);
    }

    pub fn navigated(&self) {
        self.handle.refresh(RefreshTrigger::Navigated);
    }

    pub fn conversation_changed(&self) {
        self.handle.refresh(RefreshTrigger::ConversationChanged);
    }

    /// Refresh on every server push that may change unread counts
    pub fn follow(&self, mut events: broadcast::Receiver<WsMessage>) -> JoinHandle<()> {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.affects_unread() => {
                        handle.refresh(RefreshTrigger::PushEvent);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Badge fell behind on push events");
                        handle.refresh(RefreshTrigger::PushEvent);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                if handle.is_closed() {
                    break;
                }
            }
        })
    }

    pub fn state(&self) -> BadgeState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BadgeState> {
        self.state.clone()
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for BadgeController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type Refresh = (u64, Result<Vec<Conversation>, ClientError>);

async fn run<S: SummarySource>(
    source: Arc<S>,
    interval: Duration,
    mut triggers: mpsc::UnboundedReceiver<RefreshTrigger>,
    state: watch::Sender<BadgeState>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Refresh>();
    let mut issued: u64 = 0;
    let mut applied: u64 = 0;

    loop {
        let trigger = tokio::select! {
            _ = ticker.tick() => RefreshTrigger::Interval,
            trigger = triggers.recv() => match trigger {
                Some(trigger) => trigger,
                None => break,
            },
            Some((seq, result)) = done_rx.recv() => {
                if seq <= applied {
                    debug!(seq, applied, "Discarding stale badge refresh");
                } else {
                    applied = seq;
                    apply(&state, seq, result);
                }
                continue;
            }
        };

        issued += 1;
        let seq = issued;
        debug!(seq, ?trigger, "Refreshing unread badge");

        let source = source.clone();
        let done = done_tx.clone();
        tokio::spawn(async move {
            let result = source.fetch_summaries().await;
            let _ = done.send((seq, result));
        });
    }
}

fn apply(
    state: &watch::Sender<BadgeState>,
    seq: u64,
    result: Result<Vec<Conversation>, ClientError>,
) {
    match result {
        Ok(conversations) => {
            let total = total_unread(&conversations);
            state.send_modify(|s| {
                s.total_unread = total;
                s.label = badge_label(total);
                s.revision = seq;
                s.last_error = None;
            });
        }
        Err(e) => {
            warn!(seq, error = %e, "Badge refresh failed, keeping last known count");
            state.send_modify(|s| {
                s.revision = seq;
                s.last_error = Some(e);
            });
        }
    }
}
