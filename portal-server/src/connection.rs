use std::sync::Arc;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::conversation::{ConversationSession, ReadReceipt};
use crate::error::ChatError;
use crate::messages::WsMessage;
use crate::models::input::{MessageRefInput, OrderRefInput, SendMessageInput, ValidateExt};
use crate::models::User;
use crate::state::ServerState;

/// Handle a single WebSocket connection
pub async fn handle_connection(ws_stream: WebSocketStream<TcpStream>, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Wait for Connect message to authenticate
    let user = match wait_for_connect(&mut ws_receiver, &state).await {
        Ok(user) => user,
        Err(reason) => {
            warn!("Connection rejected: {}", reason);
            let rejection = WsMessage::AuthResponse {
                success: false,
                message: reason,
                user: None,
            };
            if let Ok(json) = serde_json::to_string(&rejection) {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.close().await;
            return;
        }
    };
    let user_id = user.id;

    info!(user_id, role = ?user.role, "User connected");

    // Create channel for sending messages to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn_id = state.add_client(user_id, tx.clone());

    let auth_response = WsMessage::AuthResponse {
        success: true,
        message: "Connected to server".to_string(),
        user: Some(user.clone()),
    };
    match serde_json::to_string(&auth_response) {
        Ok(json) => {
            if let Err(e) = ws_sender.send(Message::Text(json.into())).await {
                error!(user_id, "Failed to send auth response: {}", e);
            }
        }
        Err(e) => {
            error!(user_id, "Failed to serialize auth response: {}", e);
        }
    }

    // Spawn task to forward messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = state.service.session(user);

    loop {
        tokio::select! {
            res = ws_receiver.next() => {
                match res {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_message(&text, &mut session, &state).await {
                            match serde_json::to_string(&reply) {
                                Ok(json) => {
                                    let _ = tx.send(json);
                                }
                                Err(e) => error!(user_id, "Failed to serialize reply: {}", e),
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(user_id, "User sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(user_id, "WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(user_id, "WebSocket stream ended");
                        break;
                    }
                    _ => {}
                }
            }
            // Write errors end the send task
            _ = &mut send_task => {
                info!(user_id, "Send task finished (likely connection lost)");
                break;
            }
        }
    }

    // Cleanup
    send_task.abort();
    drop(tx);
    state.remove_client(user_id, conn_id);

    info!(user_id, conn_id, "User disconnected");
}

/// Wait for the Connect message and resolve the user behind it
async fn wait_for_connect(
    receiver: &mut SplitStream<WebSocketStream<TcpStream>>,
    state: &ServerState,
) -> Result<User, String> {
    let authenticate = async {
        while let Some(result) = receiver.next().await {
            if let Ok(Message::Text(text)) = result {
                match serde_json::from_str::<WsMessage>(&text) {
                    Ok(WsMessage::Connect { user_id, token }) => {
                        if let Some(expected) = state.access_token.as_deref() {
                            if token.as_deref() != Some(expected) {
                                return Err(format!("Invalid access token for user {}", user_id));
                            }
                        }
                        return state
                            .service
                            .authenticate(user_id)
                            .await
                            .map_err(|e| e.to_string());
                    }
                    Ok(_) => {
                        warn!("Expected connect message before any request");
                    }
                    Err(e) => {
                        warn!("Failed to parse Connect message: {}", e);
                    }
                }
            }
        }
        Err("Connection closed before authentication".to_string())
    };

    match tokio::time::timeout(state.auth_timeout, authenticate).await {
        Ok(result) => result,
        Err(_) => Err("Authentication timeout".to_string()),
    }
}

/// Handle an incoming frame from an authenticated client and build the reply.
///
/// The sender of every message is the session's viewer; nothing in a request
/// can change who is speaking.
pub async fn handle_message(
    text: &str,
    session: &mut ConversationSession,
    state: &ServerState,
) -> Option<WsMessage> {
    let viewer_id = session.viewer().id;
    let msg: WsMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(user_id = viewer_id, "Failed to parse message: {}", e);
            return Some(WsMessage::Error {
                message: format!("Invalid message: {}", e),
            });
        }
    };

    let request_id = msg.request_id();
    match dispatch(msg, session, state).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(user_id = viewer_id, request_id, kind = ?e.kind(), "Request rejected: {}", e);
            request_id.map(|id| WsMessage::failure(id, &e))
        }
    }
}

async fn dispatch(
    msg: WsMessage,
    session: &mut ConversationSession,
    state: &ServerState,
) -> Result<Option<WsMessage>, ChatError> {
    match msg {
        WsMessage::GetConversation {
            request_id,
            order_id,
        } => {
            OrderRefInput { order_id }.validate_input()?;
            let (view, receipt) = session.open(order_id).await?;
            if let Some(receipt) = receipt {
                push_receipt(state, receipt);
            }
            Ok(Some(WsMessage::Conversation { request_id, view }))
        }
        WsMessage::CloseConversation { order_id } => {
            session.close(order_id);
            Ok(None)
        }
        WsMessage::SendMessage {
            request_id,
            order_id,
            receiver_id,
            content,
        } => {
            let input = SendMessageInput {
                order_id,
                receiver_id,
                content,
            };
            input.validate_input()?;
            let message = session
                .send(input.order_id, input.receiver_id, &input.content)
                .await?;
            state.push(
                message.receiver_id,
                &WsMessage::NewMessage {
                    message: message.clone(),
                },
            );
            Ok(Some(WsMessage::MessageSent {
                request_id,
                message,
            }))
        }
        WsMessage::GetSummaries {
            request_id,
            include_empty,
        } => {
            let conversations = state
                .service
                .conversation_summaries(session.viewer(), include_empty)
                .await?;
            Ok(Some(WsMessage::Summaries {
                request_id,
                conversations,
            }))
        }
        WsMessage::MarkAllRead {
            request_id,
            order_id,
        } => {
            OrderRefInput { order_id }.validate_input()?;
            let receipt = session.mark_all_read(order_id).await?;
            let marked_count = receipt.message_ids.len();
            push_receipt(state, receipt);
            Ok(Some(WsMessage::MarkedRead {
                request_id,
                order_id,
                marked_count,
            }))
        }
        WsMessage::MarkRead {
            request_id,
            message_id,
        } => {
            MessageRefInput { message_id }.validate_input()?;
            let (message, receipt) = session.mark_read(message_id).await?;
            if let Some(receipt) = receipt {
                push_receipt(state, receipt);
            }
            Ok(Some(WsMessage::MessageRead {
                request_id,
                message,
            }))
        }
        WsMessage::Connect { .. } => {
            // Already authenticated
            Ok(None)
        }
        other => {
            // Replies and pushes are server-only
            debug!(user_id = session.viewer().id, "Ignoring client frame {:?}", other);
            Ok(None)
        }
    }
}

fn push_receipt(state: &ServerState, receipt: ReadReceipt) {
    if receipt.message_ids.is_empty() {
        return;
    }
    if let Some(counterpart_id) = receipt.counterpart_id {
        state.push(
            counterpart_id,
            &WsMessage::ReadReceipt {
                order_id: receipt.order_id,
                reader_id: receipt.reader_id,
                message_ids: receipt.message_ids,
            },
        );
    }
}
