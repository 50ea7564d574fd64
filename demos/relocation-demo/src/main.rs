//! Two nodes, one cluster, one player who gets moved between them.
//!
//! Run with `RUST_LOG=debug` to watch both sides of the protocol.

use std::sync::Arc;

use bytes::Bytes;
use ferry::prelude::*;
use ferry::transport::WebSocketConnector;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Lets anyone in whose password is their name reversed.
struct MirrorAuth;

impl Authenticator for MirrorAuth {
    async fn authenticate(&self, name: &str, password: &str) -> Result<(), SessionError> {
        let expected: String = name.chars().rev().collect();
        if password == expected {
            Ok(())
        } else {
            Err(SessionError::AuthFailed("wrong password".into()))
        }
    }
}

/// Prints what the nodes send us.
struct Printer;

impl SessionHandler for Printer {
    fn session_message(&self, payload: Bytes) {
        println!("client <- {}", String::from_utf8_lossy(&payload));
    }

    fn reconnect_key_changed(&self, key: &SessionKey) {
        println!("client: reconnect key is now {key}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cluster = Arc::new(Cluster::default());
    let (inbox_tx, mut inbox) = mpsc::unbounded_channel();

    let lobby = NodeBuilder::new()
        .bind("127.0.0.1:0")
        .cluster(Arc::clone(&cluster))
        .inbox(inbox_tx.clone())
        .build(MirrorAuth)
        .await?;
    let arena = NodeBuilder::new()
        .bind("127.0.0.1:0")
        .cluster(Arc::clone(&cluster))
        .inbox(inbox_tx)
        .build(MirrorAuth)
        .await?;
    let lobby_handle = lobby.handle();
    let arena_handle = arena.handle();
    tracing::info!(lobby = %lobby.address(), arena = %arena.address(), "cluster up");
    tokio::spawn(lobby.run());
    tokio::spawn(arena.run());

    tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            println!(
                "node <- {} ({}): {}",
                message.name,
                message.session,
                String::from_utf8_lossy(&message.payload)
            );
        }
    });

    let session = ClientSession::with_handler(WebSocketConnector, ClientConfig::default(), Printer);
    session.connect(lobby_handle.address().clone()).await?;
    session.login("alice", "ecila").await?;
    session.send_message("hello lobby").await?;

    let id = lobby_handle
        .find_session("alice")
        .await
        .ok_or("lobby lost the session")?;
    lobby_handle.send_message(id, "match found, moving you").await?;
    lobby_handle.relocate(id, arena_handle.address().clone()).await?;

    session.relocate(arena_handle.address().port, true, true).await?;
    println!("client: now on {:?}", session.connect_address().await);

    arena_handle.send_message(id, "welcome to the arena").await?;
    session.send_message("hello arena").await?;

    // Let the last messages land before leaving.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    session.logout().await?;
    println!("client: {}", session.state().await);
    Ok(())
}
