use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use portal_server::models::{
    Conversation, ConversationView, Message, MessageId, OrderId, User, UserId,
};
use portal_server::{ErrorKind, WsMessage};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex as TokioMutex};
use tokio_tungstenite::{connect_async, tungstenite::Message as Frame};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Internal message type for the write channel
enum WriteMessage {
    Data(String),
    Close,
}

/// Replies awaited by in-flight requests, keyed by request id
type Pending = DashMap<u64, oneshot::Sender<WsMessage>>;

const EVENT_BUFFER: usize = 64;

/// WebSocket client for the portal messaging server.
///
/// Requests are correlated with their replies by `request_id`. Server pushes
/// (`new_message`, `read_receipt`) are fanned out to [`PortalClient::subscribe`].
pub struct PortalClient {
    user: User,
    server_url: String,
    write_tx: Arc<StdMutex<Option<mpsc::UnboundedSender<WriteMessage>>>>,
    connected: Arc<TokioMutex<bool>>,
    pending: Arc<Pending>,
    next_request: AtomicU64,
    events: broadcast::Sender<WsMessage>,
    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<()>,
    request_timeout: std::time::Duration,
}

impl PortalClient {
    /// Connect and authenticate as `user_id`. Resolves once the server has
    /// accepted the handshake; later connection drops are retried in the
    /// background.
    pub async fn connect(config: ClientConfig, user_id: UserId) -> Result<Self, ClientError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let write_tx = Arc::new(StdMutex::new(None));
        let connected = Arc::new(TokioMutex::new(false));
        let pending = Arc::new(Pending::new());
        let request_timeout = config.request_timeout;
        let server_url = config.server_url.clone();

        let task = ConnectionTask {
            config,
            user_id,
            write_tx: write_tx.clone(),
            connected: connected.clone(),
            pending: pending.clone(),
            events: events.clone(),
            shutdown_rx,
            ready: Some(ready_tx),
        };
        tokio::spawn(task.run());

        let user = match tokio::time::timeout(request_timeout, ready_rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(ClientError::Closed),
            Err(_) => {
                let _ = shutdown_tx.send(());
                return Err(ClientError::Timeout);
            }
        };

        Ok(Self {
            user,
            server_url,
            write_tx,
            connected,
            pending,
            next_request: AtomicU64::new(1),
            events,
            shutdown_tx,
            request_timeout,
        })
    }

    /// The authenticated user
    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Check if connected to server
    pub async fn is_connected(&self) -> bool {
        *self.connected.lock().await
    }

    /// Server pushes. Replies to requests are not included.
    pub fn subscribe(&self) -> broadcast::Receiver<WsMessage> {
        self.events.subscribe()
    }

    /// Gracefully disconnect from the server
    pub fn disconnect(&self) {
        info!("Initiating graceful disconnect");
        // Signal shutdown to stop reconnection loop
        let _ = self.shutdown_tx.send(());
        // Also send close message through the channel if connected
        if let Ok(guard) = self.write_tx.lock() {
            if let Some(tx) = guard.as_ref() {
                let _ = tx.send(WriteMessage::Close);
            }
        }
    }

    /// Open a conversation. Marks the viewer's unread messages as read.
    pub async fn conversation(&self, order_id: OrderId) -> Result<ConversationView, ClientError> {
        match self
            .request(|request_id| WsMessage::GetConversation {
                request_id,
                order_id,
            })
            .await?
        {
            WsMessage::Conversation { view, .. } => Ok(view),
            other => Err(unexpected(other)),
        }
    }

    /// Tell the server the viewer left the conversation. No reply.
    pub fn close_conversation(&self, order_id: OrderId) -> Result<(), ClientError> {
        self.send(&WsMessage::CloseConversation { order_id })
    }

    pub async fn send_message(
        &self,
        order_id: OrderId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<Message, ClientError> {
        let content = content.to_string();
        match self
            .request(|request_id| WsMessage::SendMessage {
                request_id,
                order_id,
                receiver_id,
                content,
            })
            .await?
        {
            WsMessage::MessageSent { message, .. } => Ok(message),
            other => Err(unexpected(other)),
        }
    }

    pub async fn conversation_summaries(
        &self,
        include_empty: bool,
    ) -> Result<Vec<Conversation>, ClientError> {
        match self
            .request(|request_id| WsMessage::GetSummaries {
                request_id,
                include_empty,
            })
            .await?
        {
            WsMessage::Summaries { conversations, .. } => Ok(conversations),
            other => Err(unexpected(other)),
        }
    }

    /// Returns how many messages were marked read
    pub async fn mark_all_read(&self, order_id: OrderId) -> Result<usize, ClientError> {
        match self
            .request(|request_id| WsMessage::MarkAllRead {
                request_id,
                order_id,
            })
            .await?
        {
            WsMessage::MarkedRead { marked_count, .. } => Ok(marked_count),
            other => Err(unexpected(other)),
        }
    }

    pub async fn mark_read(&self, message_id: MessageId) -> Result<Message, ClientError> {
        match self
            .request(|request_id| WsMessage::MarkRead {
                request_id,
                message_id,
            })
            .await?
        {
            WsMessage::MessageRead { message, .. } => Ok(message),
            other => Err(unexpected(other)),
        }
    }

    async fn request(
        &self,
        build: impl FnOnce(u64) -> WsMessage,
    ) -> Result<WsMessage, ClientError> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id, tx);

        if let Err(e) = self.send(&build(request_id)) {
            self.pending.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(WsMessage::Failure { kind, message, .. })) => {
                Err(ClientError::Rejected { kind, message })
            }
            Ok(Ok(reply)) => Ok(reply),
            // Sender dropped when the connection went away
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.pending.remove(&request_id);
                warn!(request_id, "Request timed out");
                Err(ClientError::Timeout)
            }
        }
    }

    /// Send a message to the server
    fn send(&self, message: &WsMessage) -> Result<(), ClientError> {
        let json =
            serde_json::to_string(message).map_err(|e| ClientError::Protocol(e.to_string()))?;
        debug!(preview = %json.chars().take(100).collect::<String>(), "Sending message to server");

        let guard = self
            .write_tx
            .lock()
            .map_err(|e| ClientError::Transport(format!("Lock poisoned: {}", e)))?;

        match guard.as_ref() {
            Some(tx) => tx
                .send(WriteMessage::Data(json))
                .map_err(|_| ClientError::Closed),
            None => {
                warn!("Cannot send message: not connected to server");
                Err(ClientError::Closed)
            }
        }
    }
}

fn unexpected(reply: WsMessage) -> ClientError {
    ClientError::Protocol(format!("unexpected reply: {:?}", reply))
}

/// Background half of the client: owns the socket and reconnects
struct ConnectionTask {
    config: ClientConfig,
    user_id: UserId,
    write_tx: Arc<StdMutex<Option<mpsc::UnboundedSender<WriteMessage>>>>,
    connected: Arc<TokioMutex<bool>>,
    pending: Arc<Pending>,
    events: broadcast::Sender<WsMessage>,
    shutdown_rx: broadcast::Receiver<()>,
    /// Outcome of the first handshake, reported to `connect`
    ready: Option<oneshot::Sender<Result<User, ClientError>>>,
}

impl ConnectionTask {
    async fn run(mut self) {
        loop {
            // Check for shutdown before attempting connection
            if self.shutdown_rx.try_recv().is_ok() {
                info!("Shutdown signal received, stopping reconnection");
                break;
            }

            info!(url = %self.config.server_url, "Connecting to portal server");

            match self.session().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    if let Some(ready) = self.ready.take() {
                        let _ = ready.send(Err(e));
                        return;
                    }
                    error!(
                        error = %e,
                        url = %self.config.server_url,
                        "Failed to connect to portal server"
                    );
                }
            }

            // Reconnect after delay
            debug!(delay = ?self.config.reconnect_delay, "Reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping reconnection");
                    break;
                }
            }
        }
    }

    /// One connection lifetime. `Ok(false)` means the client asked to stop.
    async fn session(&mut self) -> Result<bool, ClientError> {
        let (ws_stream, _) = connect_async(self.config.server_url.as_str()).await?;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        // Send Connect message
        let connect_msg = WsMessage::Connect {
            user_id: self.user_id,
            token: self.config.access_token.clone(),
        };
        let connect_json =
            serde_json::to_string(&connect_msg).map_err(|e| ClientError::Protocol(e.to_string()))?;
        ws_write.send(Frame::Text(connect_json.into())).await?;

        // Wait for auth response
        let user = match tokio::time::timeout(self.config.request_timeout, ws_read.next()).await {
            Err(_) => return Err(ClientError::Timeout),
            Ok(None) => return Err(ClientError::Closed),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(Frame::Text(response)))) => {
                match serde_json::from_str::<WsMessage>(&response) {
                    Ok(WsMessage::AuthResponse {
                        success: true,
                        message,
                        user: Some(user),
                    }) => {
                        info!(user_id = user.id, "Authenticated with server: {}", message);
                        user
                    }
                    Ok(WsMessage::AuthResponse { message, .. }) => {
                        return Err(ClientError::rejected(ErrorKind::Authorization, message));
                    }
                    Ok(other) => {
                        return Err(ClientError::Protocol(format!(
                            "unexpected response during auth: {:?}",
                            other
                        )));
                    }
                    Err(e) => return Err(ClientError::Protocol(e.to_string())),
                }
            }
            Ok(Some(Ok(_))) => {
                return Err(ClientError::Protocol("expected a text auth response".to_string()));
            }
        };

        // Create channel for outgoing messages
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteMessage>();
        if let Ok(mut guard) = self.write_tx.lock() {
            *guard = Some(tx);
        }
        *self.connected.lock().await = true;
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Ok(user));
        }

        // Message loop
        let mut should_reconnect = true;
        loop {
            tokio::select! {
                // Check for shutdown signal
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing connection gracefully");
                    if let Err(e) = ws_write.send(Frame::Close(None)).await {
                        warn!(error = %e, "Failed to send close frame");
                    }
                    should_reconnect = false;
                    break;
                }
                // Send outgoing messages
                Some(msg) = rx.recv() => {
                    match msg {
                        WriteMessage::Data(data) => {
                            if ws_write.send(Frame::Text(data.into())).await.is_err() {
                                error!("Failed to send message to server");
                                break;
                            }
                        }
                        WriteMessage::Close => {
                            info!("Close requested, sending close frame");
                            if let Err(e) = ws_write.send(Frame::Close(None)).await {
                                warn!(error = %e, "Failed to send close frame");
                            }
                            should_reconnect = false;
                            break;
                        }
                    }
                }
                msg = ws_read.next() => {
                    match msg {
                        Some(Ok(Frame::Text(text))) => {
                            dispatch(&self.pending, &self.events, &text);
                        }
                        Some(Ok(Frame::Close(_))) | None => {
                            info!("Server closed connection");
                            break;
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }

        // Cleanup
        if let Ok(mut guard) = self.write_tx.lock() {
            *guard = None;
        }
        *self.connected.lock().await = false;
        // Dropping the senders fails every in-flight request with `Closed`
        self.pending.clear();
        info!("Disconnected from portal server");

        Ok(should_reconnect)
    }
}

/// Route a server frame: replies go to their waiting request, everything
/// else is broadcast as an event
fn dispatch(pending: &Pending, events: &broadcast::Sender<WsMessage>, text: &str) {
    let msg = match serde_json::from_str::<WsMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "Failed to parse server frame");
            return;
        }
    };

    if let Some(request_id) = msg.request_id() {
        match pending.remove(&request_id) {
            Some((_, tx)) => {
                let _ = tx.send(msg);
            }
            None => debug!(request_id, "Reply for abandoned request"),
        }
        return;
    }

    if let WsMessage::Error { message } = &msg {
        warn!(%message, "Server reported an error");
    }
    // No subscribers is fine
    let _ = events.send(msg);
}
