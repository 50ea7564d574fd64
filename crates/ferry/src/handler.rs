//! Per-connection handler: handshake, then the session loop.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive the first message: LOGIN_REQUEST or RELOCATE_REQUEST.
//!   2. Login: redirect, or authenticate and admit a new session.
//!      Relocation: redeem the relocation key for a session moving here.
//!   3. Register the session on this node, then send the success reply.
//!   4. Loop: inbound messages from the client, commands from the
//!      [`NodeHandle`](crate::NodeHandle).
//!
//! Every refusal (bad version, redirect, bad credentials, bad key) sends
//! its reply and closes the connection.

use std::sync::Arc;

use bytes::Bytes;
use ferry_protocol::{Message, SessionKey, decode, encode};
use ferry_session::{Authenticator, SessionError, SessionId};
use ferry_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;

use crate::FerryError;
use crate::node::{Command, InboxMessage, NodeShared, NodeState};

/// A session that passed the handshake and is about to be told so.
struct Admitted {
    id: SessionId,
    name: String,
    reply: Message,
}

/// Drop guard that unregisters the session from this node when the
/// handler exits, and releases it from the cluster unless it moved on.
///
/// `Drop` is synchronous, so the async cleanup runs in a spawned task.
struct ConnectionGuard {
    id: SessionId,
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<NodeShared>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let id = self.id;
        let commands = self.commands.clone();
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            {
                let mut connections = shared.connections.lock().await;
                // A relocation back to this node may already have
                // registered a newer connection under the same id.
                if connections.get(&id).is_some_and(|tx| tx.same_channel(&commands)) {
                    connections.remove(&id);
                }
            }
            shared.cluster.release(id, &shared.address).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A: Authenticator>(
    conn: WebSocketConnection,
    state: Arc<NodeState<A>>,
) -> Result<(), FerryError> {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    // --- Step 1: Handshake ---
    let Some(admitted) = perform_handshake(&conn, &state).await? else {
        let _ = conn.close().await;
        return Ok(());
    };
    let Admitted { id, name, reply } = admitted;

    // --- Step 2: Register, then acknowledge ---
    let (commands, mut inbox) = mpsc::unbounded_channel();
    state
        .shared
        .connections
        .lock()
        .await
        .insert(id, commands.clone());
    let _guard = ConnectionGuard {
        id,
        commands,
        shared: Arc::clone(&state.shared),
    };
    send(&conn, &reply).await?;
    tracing::info!(%conn_id, %id, session = %name, "session established");

    // --- Step 3: Session loop ---
    let result = session_loop(&conn, &state.shared, id, &name, &mut inbox).await;
    let _ = conn.close().await;
    result
    // _guard drops here → unregister + release.
}

/// Receives and answers the first message.
///
/// Returns `None` if the connection should simply be closed (refused,
/// redirected, silent, or gone).
async fn perform_handshake<A: Authenticator>(
    conn: &WebSocketConnection,
    state: &NodeState<A>,
) -> Result<Option<Admitted>, FerryError> {
    let shared = &state.shared;
    let data = match tokio::time::timeout(shared.config.handshake_timeout(), conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => return Ok(None),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            tracing::debug!(conn_id = %conn.id(), "handshake timed out");
            return Ok(None);
        }
    };

    match decode(Bytes::from(data))? {
        Message::LoginRequest {
            version,
            name,
            password,
        } => login(conn, state, version, name, &password).await,
        Message::RelocateRequest {
            version,
            relocation_key,
        } => relocate(conn, shared, version, &relocation_key).await,
        other => {
            tracing::debug!(
                conn_id = %conn.id(),
                opcode = other.opcode_byte(),
                "expected a login or relocation request"
            );
            Ok(None)
        }
    }
}

async fn login<A: Authenticator>(
    conn: &WebSocketConnection,
    state: &NodeState<A>,
    version: u8,
    name: String,
    password: &str,
) -> Result<Option<Admitted>, FerryError> {
    let shared = &state.shared;

    if version != shared.config.protocol_version {
        let reason = format!("unsupported protocol version {version}");
        send(conn, &Message::LoginFailure { reason }).await?;
        return Ok(None);
    }

    if let Some(target) = &shared.redirect_to {
        tracing::info!(session = %name, %target, "redirecting login");
        let redirect = Message::LoginRedirect {
            host: target.host.clone(),
            port: target.wire_port(),
        };
        send(conn, &redirect).await?;
        return Ok(None);
    }

    if let Err(e) = state.auth.authenticate(&name, password).await {
        let reason = match e {
            SessionError::AuthFailed(reason) => reason,
            other => other.to_string(),
        };
        tracing::info!(session = %name, %reason, "login rejected");
        send(conn, &Message::LoginFailure { reason }).await?;
        return Ok(None);
    }

    let (id, reconnect_key) = shared.cluster.admit(&name, &shared.address).await;
    Ok(Some(Admitted {
        id,
        name,
        reply: Message::LoginSuccess { reconnect_key },
    }))
}

async fn relocate(
    conn: &WebSocketConnection,
    shared: &NodeShared,
    version: u8,
    key: &SessionKey,
) -> Result<Option<Admitted>, FerryError> {
    if version != shared.config.protocol_version {
        let reason = format!("unsupported protocol version {version}");
        send(conn, &Message::RelocateFailure { reason }).await?;
        return Ok(None);
    }

    match shared.cluster.complete_relocation(key, &shared.address).await {
        Ok((id, name, reconnect_key)) => Ok(Some(Admitted {
            id,
            name,
            reply: Message::RelocateSuccess { reconnect_key },
        })),
        Err(e) => {
            tracing::warn!(conn_id = %conn.id(), error = %e, "relocation refused");
            let reason = e.to_string();
            send(conn, &Message::RelocateFailure { reason }).await?;
            Ok(None)
        }
    }
}

async fn session_loop(
    conn: &WebSocketConnection,
    shared: &NodeShared,
    id: SessionId,
    name: &str,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Result<(), FerryError> {
    loop {
        tokio::select! {
            received = tokio::time::timeout(shared.config.idle_timeout(), conn.recv()) => {
                let data = match received {
                    Ok(Ok(Some(data))) => data,
                    Ok(Ok(None)) => {
                        tracing::info!(%id, session = %name, "connection closed");
                        return Ok(());
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(%id, error = %e, "recv error");
                        return Ok(());
                    }
                    Err(_) => {
                        tracing::info!(%id, session = %name, "idle timeout");
                        return Ok(());
                    }
                };

                match decode(Bytes::from(data)) {
                    Ok(Message::SessionMessage { payload }) => {
                        forward(shared, id, name, payload);
                    }
                    Ok(Message::LogoutRequest) => {
                        shared.cluster.remove(id).await;
                        send(conn, &Message::LogoutSuccess).await?;
                        tracing::info!(%id, session = %name, "logged out");
                        return Ok(());
                    }
                    Ok(other) => {
                        tracing::debug!(%id, opcode = other.opcode_byte(), "ignoring message");
                    }
                    Err(e) => {
                        tracing::warn!(%id, error = %e, "malformed message, closing");
                        return Ok(());
                    }
                }
            }
            command = commands.recv() => match command {
                Some(Command::Send(frame)) => conn.send(&frame).await?,
                Some(Command::Close) | None => {
                    tracing::info!(%id, session = %name, "disconnected by node");
                    return Ok(());
                }
            },
        }
    }
}

/// Hands a SESSION_MESSAGE to the inbox. Empty payloads are the client's
/// liveness heartbeat and stop here.
fn forward(shared: &NodeShared, id: SessionId, name: &str, payload: Bytes) {
    if payload.is_empty() {
        tracing::debug!(%id, "heartbeat");
        return;
    }
    if let Some(inbox) = &shared.inbox {
        let message = InboxMessage {
            session: id,
            name: name.to_string(),
            payload,
        };
        if inbox.send(message).is_err() {
            tracing::debug!(%id, "inbox closed, message dropped");
        }
    }
}

async fn send(conn: &WebSocketConnection, message: &Message) -> Result<(), FerryError> {
    let frame = encode(message)?;
    conn.send(&frame).await?;
    Ok(())
}
