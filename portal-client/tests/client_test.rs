//! Drives `PortalClient`, `BadgeController` and `ConversationFeed` against an
//! in-process messaging server.

use std::sync::Arc;
use std::time::Duration;

use portal_client::{BadgeController, ClientConfig, ClientError, ConversationFeed, PortalClient};
use portal_server::models::{Order, Role, User};
use portal_server::{
    ChatService, ErrorKind, InMemoryDirectory, MessageStore, ServerState, WsMessage,
};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout, Instant};

const BUYER: i64 = 10;
const SUPPLIER: i64 = 20;
const ORDER: i64 = 100;
const SECOND_ORDER: i64 = 101;

async fn start_test_server() -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let directory = Arc::new(InMemoryDirectory::new());
    directory.insert_user(User {
        id: BUYER,
        name: "Acme Buyer".to_string(),
        role: Role::Buyer,
    });
    directory.insert_user(User {
        id: SUPPLIER,
        name: "Bolt Supply".to_string(),
        role: Role::Supplier,
    });
    for (id, title) in [(ORDER, "500 hex bolts"), (SECOND_ORDER, "Lock nuts")] {
        directory.insert_order(Order {
            id,
            title: title.to_string(),
            buyer_id: BUYER,
            buyer_name: "Acme Buyer".to_string(),
            supplier_id: Some(SUPPLIER),
            supplier_name: Some("Bolt Supply".to_string()),
        });
    }

    let store = Arc::new(MessageStore::open_in_memory().unwrap());
    let service = Arc::new(ChatService::new(store, directory.clone(), directory));
    let state = Arc::new(ServerState::new(service));

    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let ws_stream = tokio_tungstenite::accept_async(stream).await.unwrap();
            let state = state.clone();
            tokio::spawn(async move {
                portal_server::handle_connection(ws_stream, state).await;
            });
        }
    });

    (format!("ws://127.0.0.1:{}", port), handle)
}

fn config(server_url: &str) -> ClientConfig {
    ClientConfig {
        server_url: server_url.to_string(),
        request_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    }
}

async fn connect(server_url: &str, user_id: i64) -> Arc<PortalClient> {
    Arc::new(PortalClient::connect(config(server_url), user_id).await.unwrap())
}

/// Poll `check` until it holds or five seconds pass
async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_connect_resolves_user() {
    let (url, server) = start_test_server().await;

    let client = connect(&url, SUPPLIER).await;
    assert_eq!(client.user().name, "Bolt Supply");
    assert_eq!(client.user().role, Role::Supplier);
    assert!(client.is_connected().await);

    server.abort();
}

#[tokio::test]
async fn test_unknown_user_is_rejected() {
    let (url, server) = start_test_server().await;

    let err = PortalClient::connect(config(&url), 404).await.err().unwrap();
    assert_eq!(err.kind(), Some(ErrorKind::Authorization));

    server.abort();
}

#[tokio::test]
async fn test_send_and_receive_push() {
    let (url, server) = start_test_server().await;

    let buyer = connect(&url, BUYER).await;
    let supplier = connect(&url, SUPPLIER).await;
    let mut events = supplier.subscribe();

    let sent = buyer.send_message(ORDER, SUPPLIER, "Need these by Friday").await.unwrap();
    assert_eq!(sent.sender_id, BUYER);

    let event = timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap();
    match event {
        WsMessage::NewMessage { message } => assert_eq!(message, sent),
        other => panic!("Expected NewMessage, got {:?}", other),
    }

    let view = supplier.conversation(ORDER).await.unwrap();
    assert_eq!(view.marked_count, 1);
    assert!(view.messages[0].read_at.is_some());

    server.abort();
}

#[tokio::test]
async fn test_rejections_carry_kind() {
    let (url, server) = start_test_server().await;
    let buyer = connect(&url, BUYER).await;

    let err = buyer.send_message(ORDER, SUPPLIER, "   ").await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Validation));

    let err = buyer.send_message(ORDER, 77, "hello").await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Authorization));

    let err = buyer.mark_read(12345).await.unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Validation));

    server.abort();
}

#[tokio::test]
async fn test_mark_read_calls() {
    let (url, server) = start_test_server().await;
    let buyer = connect(&url, BUYER).await;
    let supplier = connect(&url, SUPPLIER).await;

    let first = buyer.send_message(ORDER, SUPPLIER, "one").await.unwrap();
    buyer.send_message(ORDER, SUPPLIER, "two").await.unwrap();

    let read = supplier.mark_read(first.id).await.unwrap();
    assert!(read.read_at.is_some());
    assert_eq!(supplier.mark_all_read(ORDER).await.unwrap(), 1);
    assert_eq!(supplier.mark_all_read(ORDER).await.unwrap(), 0);

    server.abort();
}

#[tokio::test]
async fn test_badge_follows_unread_across_orders() {
    let (url, server) = start_test_server().await;
    let buyer = connect(&url, BUYER).await;
    let supplier = connect(&url, SUPPLIER).await;

    for content in ["a", "b", "c"] {
        buyer.send_message(ORDER, SUPPLIER, content).await.unwrap();
    }

    let badge = BadgeController::spawn(supplier.clone(), Duration::from_secs(60));
    let _follower = badge.follow(supplier.subscribe());
    eventually(|| badge.state().total_unread == 3).await;
    assert_eq!(badge.state().label.as_deref(), Some("3"));

    // A push for the second order refreshes the badge before the next tick
    buyer.send_message(SECOND_ORDER, SUPPLIER, "d").await.unwrap();
    eventually(|| badge.state().total_unread == 4).await;

    // Opening the first order marks its messages read and the badge follows
    let feed = ConversationFeed::open(
        supplier.clone(),
        ORDER,
        Duration::from_secs(60),
        Some(badge.handle()),
    );
    eventually(|| feed.state().view.is_some()).await;
    assert_eq!(feed.state().view.unwrap().messages.len(), 3);
    eventually(|| badge.state().total_unread == 1).await;

    let reply = feed.send("Confirmed, shipping Friday").await.unwrap();
    assert_eq!(reply.receiver_id, BUYER);
    eventually(|| feed.state().view.map_or(false, |v| v.messages.len() == 4)).await;

    feed.close().await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_requests_fail_after_disconnect() {
    let (url, server) = start_test_server().await;
    let buyer = connect(&url, BUYER).await;

    buyer.disconnect();
    let mut connected = true;
    for _ in 0..50 {
        if !buyer.is_connected().await {
            connected = false;
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(!connected);

    let err = buyer.conversation_summaries(true).await.unwrap_err();
    assert_eq!(err, ClientError::Closed);

    server.abort();
}
