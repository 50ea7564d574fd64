//! Integration tests for the client session, driven against scripted
//! WebSocket peers.
//!
//! Each peer is a raw `tokio-tungstenite` server that plays one node's
//! side of a conversation byte for byte, so every test controls exactly
//! what the client sees and when.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use ferry_client::{
    ClientConfig, ClientError, ClientSession, KeyChoice, SessionHandler, SessionState,
};
use ferry_protocol::{Message, PROTOCOL_VERSION, SessionKey, decode, encode};
use ferry_transport::{Address, WebSocketConnector};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;

// =========================================================================
// Recording handler
// =========================================================================

#[derive(Debug, PartialEq)]
enum Seen {
    Message(Bytes),
    Unknown(u8, Bytes),
    Key(SessionKey),
    Disconnected,
}

struct Recorder(mpsc::UnboundedSender<Seen>);

impl SessionHandler for Recorder {
    fn session_message(&self, payload: Bytes) {
        let _ = self.0.send(Seen::Message(payload));
    }

    fn unknown_message(&self, opcode: u8, payload: Bytes) {
        let _ = self.0.send(Seen::Unknown(opcode, payload));
    }

    fn reconnect_key_changed(&self, key: &SessionKey) {
        let _ = self.0.send(Seen::Key(key.clone()));
    }

    fn disconnected(&self) {
        let _ = self.0.send(Seen::Disconnected);
    }
}

// =========================================================================
// Scripted peers
// =========================================================================

type PeerWs = WebSocketStream<TcpStream>;

fn fast_config() -> ClientConfig {
    ClientConfig {
        connect_timeout_ms: 500,
        request_timeout_ms: 300,
        ..ClientConfig::default()
    }
}

fn key(text: &str) -> SessionKey {
    SessionKey::from(text.as_bytes())
}

fn recording_session() -> (
    ClientSession<WebSocketConnector, Recorder>,
    mpsc::UnboundedReceiver<Seen>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = ClientSession::with_handler(WebSocketConnector, fast_config(), Recorder(tx));
    (session, rx)
}

/// Binds a peer on an OS-assigned port that runs `script` on the first
/// connection it accepts.
async fn peer<F, Fut>(script: F) -> Address
where
    F: FnOnce(PeerWs) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("should bind");
    let address = Address::from(listener.local_addr().expect("local addr"));
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("should accept");
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("should upgrade");
        script(ws).await;
    });
    address
}

async fn send(ws: &mut PeerWs, message: &Message) {
    let frame = encode(message).expect("encode");
    ws.send(WsMessage::Binary(frame)).await.expect("peer send");
}

async fn send_bytes(ws: &mut PeerWs, frame: &[u8]) {
    ws.send(WsMessage::Binary(Bytes::copy_from_slice(frame)))
        .await
        .expect("peer send");
}

/// Next binary frame as raw bytes; `None` once the client is gone.
async fn recv_frame(ws: &mut PeerWs) -> Option<Bytes> {
    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            WsMessage::Binary(data) => return Some(data),
            WsMessage::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Next request from the client, skipping heartbeats.
async fn recv_request(ws: &mut PeerWs) -> Option<Message> {
    loop {
        let frame = recv_frame(ws).await?;
        match decode(frame).expect("client sent a valid frame") {
            Message::SessionMessage { payload } if payload.is_empty() => continue,
            other => return Some(other),
        }
    }
}

/// Answers the LOGIN_REQUEST with LOGIN_SUCCESS carrying `reconnect_key`.
async fn accept_login(ws: &mut PeerWs, reconnect_key: &str) {
    match recv_request(ws).await {
        Some(Message::LoginRequest { .. }) => {}
        other => panic!("expected LOGIN_REQUEST, got {other:?}"),
    }
    send(
        ws,
        &Message::LoginSuccess {
            reconnect_key: key(reconnect_key),
        },
    )
    .await;
}

/// Keeps the connection open, discarding frames, until the client leaves.
async fn hold(mut ws: PeerWs) {
    while recv_frame(&mut ws).await.is_some() {}
}

// =========================================================================
// Login
// =========================================================================

#[tokio::test]
async fn test_login_success_installs_key_and_sends_heartbeat() {
    let (frames_tx, frames_rx) = oneshot::channel();
    let addr = peer(|mut ws| async move {
        let request = recv_frame(&mut ws).await.expect("login request");
        send(&mut ws, &Message::LoginSuccess { reconnect_key: key("abc") }).await;
        let heartbeat = recv_frame(&mut ws).await.expect("heartbeat");
        let _ = frames_tx.send((request, heartbeat));
        hold(ws).await;
    })
    .await;

    let (session, mut seen) = recording_session();
    session.connect(addr.clone()).await.expect("should connect");
    assert_eq!(session.state().await, SessionState::Connected);

    session.login("alice", "pw").await.expect("login should succeed");

    assert_eq!(session.state().await, SessionState::LoggedIn);
    assert_eq!(session.reconnect_key().await, key("abc"));
    assert_eq!(session.name().await.as_deref(), Some("alice"));
    assert_eq!(session.connect_address().await, Some(addr));
    assert_eq!(seen.recv().await, Some(Seen::Key(key("abc"))));

    let (request, heartbeat) = frames_rx.await.expect("peer saw both frames");
    assert_eq!(
        request.as_ref(),
        &[
            0x10, PROTOCOL_VERSION, 0x00, 0x05, b'a', b'l', b'i', b'c', b'e', 0x00, 0x02, b'p',
            b'w'
        ]
    );
    assert_eq!(heartbeat.as_ref(), &[0x30]);
}

#[tokio::test]
async fn test_login_failure_returns_reason_and_stays_connected() {
    let addr = peer(|mut ws| async move {
        recv_request(&mut ws).await;
        send(&mut ws, &Message::LoginFailure { reason: "banned".into() }).await;
        hold(ws).await;
    })
    .await;

    let session = ClientSession::websocket(fast_config());
    session.connect(addr).await.unwrap();

    let err = session.login("mallory", "pw").await.unwrap_err();

    assert!(matches!(err, ClientError::LoginFailure(ref reason) if reason == "banned"));
    assert_eq!(session.state().await, SessionState::Connected);
    assert!(session.reconnect_key().await.is_empty());
}

#[tokio::test]
async fn test_login_timeout_leaves_session_connected() {
    let addr = peer(|mut ws| async move {
        recv_request(&mut ws).await;
        // Never answer.
        hold(ws).await;
    })
    .await;

    let session = ClientSession::websocket(fast_config());
    session.connect(addr).await.unwrap();

    let err = session.login("alice", "pw").await.unwrap_err();

    assert!(matches!(err, ClientError::LoginTimeout(_)));
    assert!(err.is_timeout());
    assert_eq!(session.state().await, SessionState::Connected);
    assert!(session.is_connected().await);
}

#[tokio::test]
async fn test_login_malformed_reply_returns_framing_error() {
    let addr = peer(|mut ws| async move {
        recv_request(&mut ws).await;
        // LOGIN_FAILURE whose reason length runs past the end.
        send_bytes(&mut ws, &[0x12, 0x00, 0x09, b'x']).await;
        hold(ws).await;
    })
    .await;

    let (session, mut seen) = recording_session();
    session.connect(addr).await.unwrap();

    let err = session.login("alice", "pw").await.unwrap_err();

    assert!(matches!(err, ClientError::Framing(_)), "got {err:?}");
    assert_eq!(session.state().await, SessionState::Disconnected);
    assert_eq!(seen.recv().await, Some(Seen::Disconnected));
}

#[tokio::test]
async fn test_login_connection_closed_returns_connection_lost() {
    let addr = peer(|mut ws| async move {
        recv_request(&mut ws).await;
        let _ = ws.close(None).await;
    })
    .await;

    let session = ClientSession::websocket(fast_config());
    session.connect(addr).await.unwrap();

    let err = session.login("alice", "pw").await.unwrap_err();

    assert!(matches!(err, ClientError::ConnectionLost { operation: "login" }));
    assert_eq!(session.state().await, SessionState::Disconnected);
}

#[tokio::test]
async fn test_duplicate_login_success_is_ignored() {
    let addr = peer(|mut ws| async move {
        accept_login(&mut ws, "first").await;
        send(&mut ws, &Message::LoginSuccess { reconnect_key: key("second") }).await;
        send(&mut ws, &Message::SessionMessage { payload: Bytes::from_static(b"marker") }).await;
        hold(ws).await;
    })
    .await;

    let (session, mut seen) = recording_session();
    session.connect(addr).await.unwrap();
    session.login("alice", "pw").await.unwrap();

    assert_eq!(seen.recv().await, Some(Seen::Key(key("first"))));
    assert_eq!(seen.recv().await, Some(Seen::Message(Bytes::from_static(b"marker"))));
    assert_eq!(session.reconnect_key().await, key("first"));
    assert_eq!(session.state().await, SessionState::LoggedIn);
}

#[tokio::test]
async fn test_login_requires_connection() {
    let session = ClientSession::websocket(fast_config());

    let err = session.login("alice", "pw").await.unwrap_err();

    assert!(matches!(err, ClientError::NotConnected));
}

#[tokio::test]
async fn test_login_redirect_keeps_target_after_success() {
    let target = peer(|mut ws| async move {
        accept_login(&mut ws, "k").await;
        hold(ws).await;
    })
    .await;
    let redirect = Message::LoginRedirect {
        host: target.host.clone(),
        port: target.wire_port(),
    };
    let front = peer(move |mut ws| async move {
        recv_request(&mut ws).await;
        send(&mut ws, &redirect).await;
        hold(ws).await;
    })
    .await;

    let session = ClientSession::websocket(fast_config());
    session.connect(front).await.unwrap();

    session.login("alice", "pw").await.expect("redirected login should succeed");

    assert_eq!(session.state().await, SessionState::LoggedIn);
    assert_eq!(session.connect_address().await, Some(target.clone()));
    assert_eq!(session.redirect_address().await, Some(target));
}

#[tokio::test]
async fn test_login_redirect_loop_stops_at_hop_limit() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = Address::from(listener.local_addr().unwrap());
    let (count_tx, mut count_rx) = mpsc::unbounded_channel();
    let own = addr.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let own = own.clone();
            let count_tx = count_tx.clone();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                if let Some(Message::LoginRequest { .. }) = recv_request(&mut ws).await {
                    let _ = count_tx.send(());
                    let redirect = Message::LoginRedirect {
                        host: own.host.clone(),
                        port: own.wire_port(),
                    };
                    send(&mut ws, &redirect).await;
                }
                hold(ws).await;
            });
        }
    });

    let config = ClientConfig {
        max_redirects: 2,
        ..fast_config()
    };
    let session = ClientSession::websocket(config);
    session.connect(addr.clone()).await.unwrap();

    let err = session.login("alice", "pw").await.unwrap_err();

    assert!(matches!(err, ClientError::TooManyRedirects { hops: 2 }));
    assert_eq!(session.state().await, SessionState::Disconnected);
    assert_eq!(session.redirect_address().await, Some(addr));

    let mut logins = 0;
    while count_rx.try_recv().is_ok() {
        logins += 1;
    }
    assert_eq!(logins, 3);
}

// =========================================================================
// Connect / disconnect
// =========================================================================

#[tokio::test]
async fn test_connect_refused_returns_connect_failed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = Address::from(listener.local_addr().unwrap());
    drop(listener);

    let session = ClientSession::websocket(fast_config());
    let err = session.connect(addr).await.unwrap_err();

    assert!(matches!(err, ClientError::ConnectFailed { .. }));
    assert_eq!(session.state().await, SessionState::Disconnected);
}

#[tokio::test]
async fn test_connect_without_handshake_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = Address::from(listener.local_addr().unwrap());
    tokio::spawn(async move {
        // Accept the TCP connection but never answer the upgrade.
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let config = ClientConfig {
        connect_timeout_ms: 100,
        ..fast_config()
    };
    let session = ClientSession::websocket(config);
    let err = session.connect(addr).await.unwrap_err();

    assert!(matches!(err, ClientError::ConnectTimeout { .. }));
    assert!(err.is_timeout());
    assert_eq!(session.state().await, SessionState::Disconnected);
    assert!(!session.is_connected().await);
}

#[tokio::test]
async fn test_connect_twice_returns_invalid_state() {
    let addr = peer(hold).await;
    let session = ClientSession::websocket(fast_config());
    session.connect(addr.clone()).await.unwrap();

    let err = session.connect(addr).await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::InvalidState {
            operation: "connect",
            state: SessionState::Connected
        }
    ));
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let session = ClientSession::websocket(fast_config());
    session.disconnect().await;
    assert_eq!(session.state().await, SessionState::Disconnected);

    let addr = peer(hold).await;
    session.connect(addr).await.unwrap();
    session.disconnect().await;
    session.disconnect().await;

    assert_eq!(session.state().await, SessionState::Disconnected);
    assert!(!session.is_connected().await);
    assert!(session.wait_for_disconnect(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn test_node_closing_logged_in_session_notifies_handler() {
    let addr = peer(|mut ws| async move {
        accept_login(&mut ws, "k").await;
        let _ = ws.close(None).await;
    })
    .await;

    let (session, mut seen) = recording_session();
    session.connect(addr).await.unwrap();
    session.login("alice", "pw").await.unwrap();

    assert!(session.wait_for_disconnect(Duration::from_secs(2)).await);
    assert_eq!(seen.recv().await, Some(Seen::Key(key("k"))));
    assert_eq!(seen.recv().await, Some(Seen::Disconnected));
    // The key survives an unexpected close.
    assert_eq!(session.reconnect_key().await, key("k"));
}

// =========================================================================
// Application traffic
// =========================================================================

#[tokio::test]
async fn test_session_and_unknown_messages_reach_handler() {
    let (payload_tx, payload_rx) = oneshot::channel();
    let addr = peer(|mut ws| async move {
        accept_login(&mut ws, "k").await;
        send(&mut ws, &Message::SessionMessage { payload: Bytes::from_static(b"hi") }).await;
        send_bytes(&mut ws, &[0x99, 0x01, 0x02]).await;
        if let Some(Message::SessionMessage { payload }) = recv_request(&mut ws).await {
            let _ = payload_tx.send(payload);
        }
        hold(ws).await;
    })
    .await;

    let (session, mut seen) = recording_session();
    session.connect(addr).await.unwrap();
    session.login("alice", "pw").await.unwrap();

    assert_eq!(seen.recv().await, Some(Seen::Key(key("k"))));
    assert_eq!(seen.recv().await, Some(Seen::Message(Bytes::from_static(b"hi"))));
    assert_eq!(seen.recv().await, Some(Seen::Unknown(0x99, Bytes::from_static(&[0x01, 0x02]))));

    session.send_message(&b"reply"[..]).await.unwrap();
    assert_eq!(payload_rx.await.unwrap().as_ref(), b"reply");
}

#[tokio::test]
async fn test_send_message_before_login_fails() {
    let session = ClientSession::websocket(fast_config());
    assert!(matches!(
        session.send_message(&b"x"[..]).await,
        Err(ClientError::NotConnected)
    ));

    let addr = peer(hold).await;
    session.connect(addr).await.unwrap();
    assert!(matches!(
        session.send_message(&b"x"[..]).await,
        Err(ClientError::InvalidState { .. })
    ));
}

// =========================================================================
// Relocation
// =========================================================================

/// A peer that logs the client in, then tells it to move to `target`.
async fn notifying_peer(target: Address, relocation_key: &'static str) -> Address {
    peer(move |mut ws| async move {
        accept_login(&mut ws, "first").await;
        let notice = Message::RelocateNotification {
            host: target.host.clone(),
            port: target.wire_port(),
            relocation_key: key(relocation_key),
        };
        send(&mut ws, &notice).await;
        hold(ws).await;
    })
    .await
}

#[tokio::test]
async fn test_wait_for_relocation_port_mismatch() {
    let origin = notifying_peer(Address::new("127.0.0.1", 4000), "move").await;
    let session = ClientSession::websocket(fast_config());
    session.connect(origin).await.unwrap();
    session.login("alice", "pw").await.unwrap();

    let err = session.wait_for_relocation_notification(5000).await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::RelocationMismatch {
            expected: 5000,
            actual: 4000
        }
    ));
    // The notice is kept; a wildcard wait returns it at once.
    let notice = session.wait_for_relocation_notification(0).await.unwrap();
    assert_eq!(notice.address, Address::new("127.0.0.1", 4000));
    assert_eq!(notice.key, key("move"));
    assert_eq!(session.state().await, SessionState::RelocationNoticeReceived);
}

#[tokio::test]
async fn test_wait_for_relocation_times_out() {
    let addr = peer(|mut ws| async move {
        accept_login(&mut ws, "k").await;
        hold(ws).await;
    })
    .await;
    let session = ClientSession::websocket(fast_config());
    session.connect(addr).await.unwrap();
    session.login("alice", "pw").await.unwrap();

    let err = session.wait_for_relocation_notification(0).await.unwrap_err();

    assert!(matches!(err, ClientError::RelocationTimeout(_)));
    assert_eq!(session.state().await, SessionState::LoggedIn);
}

#[tokio::test]
async fn test_relocate_success_installs_new_key() {
    let (request_tx, request_rx) = oneshot::channel();
    let target = peer(|mut ws| async move {
        let request = recv_request(&mut ws).await;
        let _ = request_tx.send(request);
        send(&mut ws, &Message::RelocateSuccess { reconnect_key: key("second") }).await;
        hold(ws).await;
    })
    .await;
    let origin = notifying_peer(target.clone(), "move").await;

    let (session, mut seen) = recording_session();
    session.connect(origin).await.unwrap();
    session.login("alice", "pw").await.unwrap();

    session.relocate(target.port, true, true).await.expect("relocation should succeed");

    assert_eq!(session.state().await, SessionState::LoggedIn);
    assert_eq!(session.reconnect_key().await, key("second"));
    assert_eq!(session.connect_address().await, Some(target));
    assert!(session.relocation_notice().await.is_none());
    assert_eq!(
        request_rx.await.unwrap(),
        Some(Message::RelocateRequest {
            version: PROTOCOL_VERSION,
            relocation_key: key("move"),
        })
    );
    assert_eq!(seen.recv().await, Some(Seen::Key(key("first"))));
    assert_eq!(seen.recv().await, Some(Seen::Key(key("second"))));
}

#[tokio::test]
async fn test_relocate_ignores_frames_from_left_node() {
    let target = peer(|mut ws| async move {
        recv_request(&mut ws).await;
        send(&mut ws, &Message::RelocateSuccess { reconnect_key: key("second") }).await;
        hold(ws).await;
    })
    .await;
    let (late_tx, late_rx) = oneshot::channel::<()>();
    let notice = Message::RelocateNotification {
        host: target.host.clone(),
        port: target.wire_port(),
        relocation_key: key("move"),
    };
    let origin = peer(move |mut ws| async move {
        accept_login(&mut ws, "first").await;
        send(&mut ws, &notice).await;
        // Speak again only once the client has moved on. Nothing is read
        // in between, so the client's close isn't acknowledged yet.
        let _ = late_rx.await;
        for late in [
            Message::SessionMessage { payload: Bytes::from_static(b"stale") },
            Message::RelocateFailure { reason: "too late".into() },
            Message::LoginSuccess { reconnect_key: key("stale") },
        ] {
            let Ok(frame) = encode(&late) else { return };
            if ws.send(WsMessage::Binary(frame)).await.is_err() {
                return;
            }
        }
        hold(ws).await;
    })
    .await;

    let (session, mut seen) = recording_session();
    session.connect(origin).await.unwrap();
    session.login("alice", "pw").await.unwrap();
    session.relocate(target.port, true, true).await.expect("relocation should succeed");
    assert_eq!(seen.recv().await, Some(Seen::Key(key("first"))));
    assert_eq!(seen.recv().await, Some(Seen::Key(key("second"))));

    late_tx.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(session.state().await, SessionState::LoggedIn);
    assert_eq!(session.reconnect_key().await, key("second"));
    assert_eq!(session.connect_address().await, Some(target));
    assert!(seen.try_recv().is_err(), "left node's frames must not reach the handler");
}

#[tokio::test]
async fn test_relocate_with_empty_key_expected_rejection_is_ok() {
    let (key_tx, key_rx) = oneshot::channel();
    let target = peer(|mut ws| async move {
        if let Some(Message::RelocateRequest { relocation_key, .. }) = recv_request(&mut ws).await {
            let _ = key_tx.send(relocation_key);
        }
        send(&mut ws, &Message::RelocateFailure { reason: "invalid key".into() }).await;
        hold(ws).await;
    })
    .await;
    let origin = notifying_peer(target.clone(), "move").await;

    let session = ClientSession::websocket(fast_config());
    session.connect(origin).await.unwrap();
    session.login("alice", "pw").await.unwrap();

    session.relocate(target.port, false, false).await.expect("rejection was expected");

    assert!(key_rx.await.unwrap().is_empty());
    assert_eq!(session.state().await, SessionState::Disconnected);
    assert_eq!(session.reconnect_key().await, key("first"));
}

#[tokio::test]
async fn test_relocate_unexpected_rejection_is_reported() {
    let target = peer(|mut ws| async move {
        recv_request(&mut ws).await;
        send(&mut ws, &Message::RelocateFailure { reason: "full".into() }).await;
        hold(ws).await;
    })
    .await;
    let origin = notifying_peer(target.clone(), "move").await;

    let session = ClientSession::websocket(fast_config());
    session.connect(origin).await.unwrap();
    session.login("alice", "pw").await.unwrap();

    let err = session.relocate(target.port, true, true).await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::UnexpectedRelocationOutcome { expected: "success", .. }
    ));
    assert_eq!(session.state().await, SessionState::Disconnected);
}

#[tokio::test]
async fn test_relocate_with_other_key_sends_it() {
    let (key_tx, key_rx) = oneshot::channel();
    let target = peer(|mut ws| async move {
        if let Some(Message::RelocateRequest { relocation_key, .. }) = recv_request(&mut ws).await {
            let _ = key_tx.send(relocation_key);
        }
        send(&mut ws, &Message::RelocateFailure { reason: "invalid key".into() }).await;
        hold(ws).await;
    })
    .await;
    let origin = notifying_peer(target.clone(), "move").await;

    let session = ClientSession::websocket(fast_config());
    session.connect(origin).await.unwrap();
    session.login("alice", "pw").await.unwrap();

    let err = session
        .relocate_with(target.port, KeyChoice::Other(key("stale")))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::RelocateFailure(ref reason) if reason == "invalid key"));
    assert_eq!(key_rx.await.unwrap(), key("stale"));
}

#[tokio::test]
async fn test_relocate_timeout_disconnects() {
    let target = peer(|mut ws| async move {
        recv_request(&mut ws).await;
        hold(ws).await;
    })
    .await;
    let origin = notifying_peer(target.clone(), "move").await;

    let session = ClientSession::websocket(fast_config());
    session.connect(origin).await.unwrap();
    session.login("alice", "pw").await.unwrap();

    let err = session.relocate(target.port, true, true).await.unwrap_err();

    assert!(matches!(err, ClientError::RelocateTimeout(_)));
    assert_eq!(session.state().await, SessionState::Disconnected);
}

// =========================================================================
// Logout
// =========================================================================

#[tokio::test]
async fn test_logout_success_clears_key_and_disconnects() {
    let addr = peer(|mut ws| async move {
        accept_login(&mut ws, "k").await;
        if let Some(Message::LogoutRequest) = recv_request(&mut ws).await {
            send(&mut ws, &Message::LogoutSuccess).await;
        }
        hold(ws).await;
    })
    .await;
    let session = ClientSession::websocket(fast_config());
    session.connect(addr).await.unwrap();
    session.login("alice", "pw").await.unwrap();

    session.logout().await.expect("logout should succeed");

    assert_eq!(session.state().await, SessionState::Disconnected);
    assert!(session.reconnect_key().await.is_empty());
    // Logging out of nothing is a no-op.
    session.logout().await.unwrap();
}

#[tokio::test]
async fn test_logout_timeout_is_soft_failure() {
    let addr = peer(|mut ws| async move {
        accept_login(&mut ws, "k").await;
        hold(ws).await;
    })
    .await;
    let session = ClientSession::websocket(fast_config());
    session.connect(addr).await.unwrap();
    session.login("alice", "pw").await.unwrap();

    let err = session.logout().await.unwrap_err();

    assert!(matches!(err, ClientError::LogoutTimeout(_)));
    assert!(!err.is_fatal());
    assert_eq!(session.state().await, SessionState::Disconnected);
    assert_eq!(session.reconnect_key().await, key("k"));
}
