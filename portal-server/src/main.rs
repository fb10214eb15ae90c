use std::sync::Arc;

use portal_server::{
    handle_connection, ChatService, InMemoryDirectory, MessageStore, ServerConfig, ServerState,
};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();

    let store = match MessageStore::open(&config.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open message store at {}: {}", config.db_path, e);
            std::process::exit(1);
        }
    };

    let directory = match &config.seed_path {
        Some(path) => match InMemoryDirectory::load(path) {
            Ok(directory) => directory,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        },
        None => {
            warn!("PORTAL_SEED_PATH not set, starting with an empty directory");
            InMemoryDirectory::new()
        }
    };
    let directory = Arc::new(directory);

    let service = Arc::new(ChatService::new(store, directory.clone(), directory));
    let state = Arc::new(
        ServerState::new(service)
            .with_access_token(config.access_token.clone())
            .with_auth_timeout(config.auth_timeout),
    );

    // Bind TCP listener
    let listener = match TcpListener::bind(&config.addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.addr, e);
            std::process::exit(1);
        }
    };

    info!("Portal messaging server listening on {}", config.addr);

    // Accept connections
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                info!("New connection from {}", peer_addr);

                let state = state.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws_stream) => {
                            handle_connection(ws_stream, state).await;
                        }
                        Err(e) => {
                            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
                        }
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
