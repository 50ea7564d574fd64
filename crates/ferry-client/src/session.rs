//! The client session: one logical session that can move between nodes.
//!
//! # Concurrency model
//!
//! Two kinds of code touch a session at the same time:
//!
//! - **The event task** ("pump"), spawned when the session is created. It
//!   receives [`ConnectionEvent`]s from the transport driver, decodes
//!   messages, and updates the state.
//! - **Callers** running `connect`, `login`, `relocate`, `logout` and
//!   friends. Each one changes the state, sends a request, and then waits
//!   for the pump to resolve it (or for its deadline).
//!
//! All mutable state lives in one [`Inner`] behind one `Mutex`. Nobody
//! holds that lock across I/O: sends and closes happen after the guard is
//! dropped. Every transition bumps a `watch` counter, which wakes every
//! waiter; each waiter then re-checks its own condition under the lock.
//!
//! ```text
//!  transport driver ──events──→ pump ──lock──→ Inner ←──lock── caller
//!                                 │                              ↑
//!                                 └──────── watch signal ────────┘
//! ```
//!
//! A connection is identified by the [`ConnectionId`] of the attempt that
//! created it. Events carrying any other ID are stale (an old node we
//! already left, an aborted attempt) and are dropped.

use std::sync::Arc;

use bytes::Bytes;
use ferry_protocol::{Message, SessionKey, decode, encode};
use ferry_transport::{
    Address, Connection, ConnectionEvent, ConnectionId, Connector, Handle,
    PendingConnect, WebSocketConnector, open,
};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::state::{Abort, LoginReply, Pending, RelocateReply};
use crate::{
    ClientConfig, ClientError, KeyChoice, LoginOutcome, RelocationNotice,
    SessionHandler, SessionState,
};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Everything that changes over a session's life. Only touched under
/// [`Shared::inner`]'s lock.
struct Inner<C> {
    state: SessionState,
    /// Name used by the last login attempt.
    name: Option<String>,
    /// The one live connection. Replaced, never mutated in place.
    connection: Option<Handle<C>>,
    pending_connect: Option<PendingConnect>,
    connect_address: Option<Address>,
    reconnect_key: SessionKey,
    redirect: Option<Address>,
    relocation: Option<RelocationNotice>,

    connect: Pending<Result<(), String>>,
    login: Pending<Result<LoginReply, Abort>>,
    relocate: Pending<Result<RelocateReply, Abort>>,
    logout: Pending<Result<(), Abort>>,
}

impl<C> Inner<C> {
    fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            name: None,
            connection: None,
            pending_connect: None,
            connect_address: None,
            reconnect_key: SessionKey::empty(),
            redirect: None,
            relocation: None,
            connect: Pending::Idle,
            login: Pending::Idle,
            relocate: Pending::Idle,
            logout: Pending::Idle,
        }
    }

    fn is_current(&self, id: ConnectionId) -> bool {
        self.connection.as_ref().is_some_and(|h| h.id() == id)
    }

    fn is_connecting(&self, id: ConnectionId) -> bool {
        self.pending_connect.as_ref().is_some_and(|p| p.id() == id)
    }

    /// A connect attempt ended without a connection.
    fn connect_failed(&mut self, reason: String) {
        self.pending_connect = None;
        self.state = SessionState::Disconnected;
        self.connect.resolve(Err(reason));
    }

    /// Drops the connection and any pending connect, and fails every
    /// waiting request with `cause`. The caller sets the new state and
    /// closes the returned handle once the lock is released.
    fn teardown(&mut self, cause: Abort) -> Option<Handle<C>> {
        if let Some(pending) = self.pending_connect.take() {
            pending.abort();
        }
        self.relocation = None;
        self.connect.resolve(Err(cause.reason()));
        self.login.resolve(Err(cause.clone()));
        self.relocate.resolve(Err(cause.clone()));
        self.logout.resolve(Err(cause));
        self.connection.take()
    }
}

struct Shared<C, H> {
    inner: Mutex<Inner<C>>,
    /// Bumped on every transition; the value itself means nothing.
    signal: watch::Sender<u64>,
    handler: H,
}

impl<C, H> Shared<C, H> {
    fn notify(&self) {
        self.signal.send_modify(|n| *n = n.wrapping_add(1));
    }
}

// ---------------------------------------------------------------------------
// ClientSession
// ---------------------------------------------------------------------------

/// A client-side session: connect, log in (following redirects), relocate
/// between nodes on request, log out.
///
/// Operations take `&self`, so a session can be shared (`Arc`) between a
/// task that drives the lifecycle and tasks that send messages. Every
/// waiting operation is bounded by a deadline from [`ClientConfig`].
///
/// Must be created inside a Tokio runtime: construction spawns the task
/// that processes connection events. Dropping the session stops that task
/// and closes the connection.
///
/// # Example
///
/// ```rust,no_run
/// use ferry_client::{ClientConfig, ClientSession};
/// use ferry_transport::Address;
///
/// # async fn run() -> Result<(), ferry_client::ClientError> {
/// let session = ClientSession::websocket(ClientConfig::default());
/// session.connect(Address::new("127.0.0.1", 9000)).await?;
/// session.login("alice", "secret").await?;
///
/// // The cluster moves us; follow it with the key it handed out.
/// session.relocate(0, true, true).await?;
///
/// session.logout().await?;
/// # Ok(())
/// # }
/// ```
pub struct ClientSession<K: Connector, H: SessionHandler = ()> {
    config: ClientConfig,
    connector: Arc<K>,
    shared: Arc<Shared<K::Connection, H>>,
    events: mpsc::UnboundedSender<ConnectionEvent<K::Connection>>,
    pump: JoinHandle<()>,
}

impl ClientSession<WebSocketConnector> {
    /// A session that connects over WebSocket and ignores application
    /// messages.
    pub fn websocket(config: ClientConfig) -> Self {
        Self::new(WebSocketConnector, config)
    }
}

impl<K: Connector> ClientSession<K> {
    /// A session that ignores application messages.
    pub fn new(connector: K, config: ClientConfig) -> Self {
        Self::with_handler(connector, config, ())
    }
}

impl<K: Connector, H: SessionHandler> ClientSession<K, H> {
    /// A session that passes application messages to `handler`.
    pub fn with_handler(connector: K, config: ClientConfig, handler: H) -> Self {
        let (signal, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner::new()),
            signal,
            handler,
        });
        let (events, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump(Arc::clone(&shared), rx));

        Self {
            config,
            connector: Arc::new(connector),
            shared,
            events,
            pump,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.shared.handler
    }

    // -- connect -----------------------------------------------------------

    /// Connects to `address`.
    ///
    /// # Errors
    /// - [`ClientError::InvalidState`] unless the session is `Disconnected`
    /// - [`ClientError::ConnectTimeout`] if the connection isn't up within
    ///   `connect_timeout` (the attempt is aborted)
    /// - [`ClientError::ConnectFailed`] if the transport gave up first
    pub async fn connect(&self, address: Address) -> Result<(), ClientError> {
        {
            let mut inner = self.shared.inner.lock().await;
            if inner.state != SessionState::Disconnected {
                return Err(ClientError::InvalidState {
                    operation: "connect",
                    state: inner.state,
                });
            }
            self.start_connect(&mut inner, address.clone(), SessionState::Connecting);
        }
        self.shared.notify();
        self.finish_connect(&address).await
    }

    fn start_connect(
        &self,
        inner: &mut Inner<K::Connection>,
        address: Address,
        state: SessionState,
    ) {
        let pending = open(Arc::clone(&self.connector), address.clone(), self.events.clone());
        tracing::debug!(id = %pending.id(), %address, "connecting");
        inner.pending_connect = Some(pending);
        inner.connect_address = Some(address);
        inner.connect.begin();
        inner.state = state;
    }

    async fn finish_connect(&self, address: &Address) -> Result<(), ClientError> {
        let deadline = Instant::now() + self.config.connect_timeout();
        let outcome = self
            .wait_until(
                deadline,
                |inner| inner.connect.take(),
                |inner| {
                    inner.connect.cancel();
                    if let Some(pending) = inner.pending_connect.take() {
                        pending.abort();
                    }
                    inner.state = SessionState::Disconnected;
                    inner.connection.take()
                },
            )
            .await;

        match outcome {
            Ok(Ok(())) => {
                tracing::info!(%address, "connected");
                Ok(())
            }
            Ok(Err(reason)) => {
                tracing::warn!(%address, %reason, "connect failed");
                Err(ClientError::ConnectFailed {
                    address: address.clone(),
                    reason,
                })
            }
            Err(late) => {
                self.shared.notify();
                if let Some(handle) = late {
                    let _ = handle.close().await;
                }
                tracing::warn!(%address, "connect timed out");
                Err(ClientError::ConnectTimeout {
                    address: address.clone(),
                })
            }
        }
    }

    // -- login -------------------------------------------------------------

    /// Logs in, following LOGIN_REDIRECTs.
    ///
    /// On a redirect the session disconnects, connects to the named node
    /// and sends the same credentials again, at most `max_redirects` times.
    ///
    /// # Errors
    /// - [`ClientError::LoginFailure`] with the node's reason
    /// - [`ClientError::LoginTimeout`]; the session stays `Connected`
    /// - [`ClientError::TooManyRedirects`] once the hop limit is exceeded
    /// - anything [`connect`](Self::connect) returns for a redirect hop
    pub async fn login(&self, name: &str, password: &str) -> Result<(), ClientError> {
        // Each hop records where it was sent; only a new login forgets.
        self.shared.inner.lock().await.redirect = None;
        let mut hops = 0u32;
        loop {
            match self.login_once(name, password).await? {
                LoginOutcome::LoggedIn => return Ok(()),
                LoginOutcome::Redirected(next) => {
                    self.disconnect().await;
                    if hops >= self.config.max_redirects {
                        tracing::warn!(session = %name, hops, "too many login redirects");
                        return Err(ClientError::TooManyRedirects { hops });
                    }
                    hops += 1;
                    tracing::info!(session = %name, to = %next, hop = hops, "following login redirect");
                    self.connect(next).await?;
                }
            }
        }
    }

    /// Sends one LOGIN_REQUEST and waits for the answer, without following
    /// a redirect.
    ///
    /// # Errors
    /// Same as [`login`](Self::login), minus the redirect handling, plus
    /// [`ClientError::NotConnected`] / [`ClientError::InvalidState`] unless
    /// the session is connected and not yet logged in.
    pub async fn login_once(
        &self,
        name: &str,
        password: &str,
    ) -> Result<LoginOutcome, ClientError> {
        let request = encode(&Message::LoginRequest {
            version: self.config.protocol_version,
            name: name.to_string(),
            password: password.to_string(),
        })?;
        let deadline = Instant::now() + self.config.request_timeout();

        let handle = {
            let mut inner = self.shared.inner.lock().await;
            match inner.state {
                SessionState::Connected => {}
                SessionState::Disconnected => return Err(ClientError::NotConnected),
                state => {
                    return Err(ClientError::InvalidState {
                        operation: "log in",
                        state,
                    });
                }
            }
            let handle = inner.connection.clone().ok_or(ClientError::NotConnected)?;
            inner.name = Some(name.to_string());
            inner.login.begin();
            inner.state = SessionState::AwaitingLoginAck;
            handle
        };
        self.shared.notify();

        if let Err(e) = handle.send(&request).await {
            let mut inner = self.shared.inner.lock().await;
            inner.login.cancel();
            if inner.state == SessionState::AwaitingLoginAck && inner.is_current(handle.id()) {
                inner.state = SessionState::Connected;
            }
            return Err(e.into());
        }
        tracing::debug!(session = %name, "login request sent");

        let reply = self
            .wait_until(
                deadline,
                |inner| inner.login.take(),
                |inner| {
                    inner.login.cancel();
                    if inner.state == SessionState::AwaitingLoginAck {
                        inner.state = SessionState::Connected;
                    }
                },
            )
            .await;

        match reply {
            Ok(Ok(LoginReply::Success)) => Ok(LoginOutcome::LoggedIn),
            Ok(Ok(LoginReply::Failure(reason))) => {
                tracing::info!(session = %name, %reason, "login rejected");
                Err(ClientError::LoginFailure(reason))
            }
            Ok(Ok(LoginReply::Redirect { host, port })) => {
                let target = Address::from_wire(&host, port)?;
                Ok(LoginOutcome::Redirected(target))
            }
            Ok(Err(abort)) => Err(abort.into_error("login")),
            Err(()) => {
                self.shared.notify();
                tracing::warn!(session = %name, "login timed out");
                Err(ClientError::LoginTimeout(self.config.request_timeout()))
            }
        }
    }

    // -- relocation --------------------------------------------------------

    /// Waits until the node sends RELOCATE_NOTIFICATION. Returns at once if
    /// one was already received.
    ///
    /// `expected_port = 0` accepts any target.
    ///
    /// # Errors
    /// - [`ClientError::RelocationTimeout`] if nothing arrives in time
    /// - [`ClientError::RelocationMismatch`] if the target port differs
    /// - [`ClientError::ConnectionLost`] if the node goes away first
    pub async fn wait_for_relocation_notification(
        &self,
        expected_port: u16,
    ) -> Result<RelocationNotice, ClientError> {
        const OPERATION: &str = "wait for relocation";
        {
            let inner = self.shared.inner.lock().await;
            match inner.state {
                SessionState::LoggedIn | SessionState::RelocationNoticeReceived => {}
                SessionState::Disconnected => return Err(ClientError::NotConnected),
                state => {
                    return Err(ClientError::InvalidState {
                        operation: OPERATION,
                        state,
                    });
                }
            }
        }

        let timeout = self.config.request_timeout();
        let deadline = Instant::now() + timeout;
        let notice = self
            .wait_until(
                deadline,
                |inner| {
                    if let Some(notice) = &inner.relocation {
                        return Some(Ok(notice.clone()));
                    }
                    match inner.state {
                        SessionState::LoggedIn => None,
                        SessionState::Disconnected => {
                            Some(Err(ClientError::ConnectionLost { operation: OPERATION }))
                        }
                        state => Some(Err(ClientError::InvalidState {
                            operation: OPERATION,
                            state,
                        })),
                    }
                },
                |_| (),
            )
            .await
            .map_err(|()| ClientError::RelocationTimeout(timeout))??;

        if expected_port != 0 && notice.address.port != expected_port {
            return Err(ClientError::RelocationMismatch {
                expected: expected_port,
                actual: notice.address.port,
            });
        }
        Ok(notice)
    }

    /// Relocates and checks the outcome against an expectation.
    ///
    /// `use_valid_key` picks between the notified key and an empty one.
    /// `should_succeed` is not sent anywhere: it is what the caller
    /// expects the new node to decide. An expected rejection returns
    /// `Ok(())` with the session `Disconnected`.
    ///
    /// # Errors
    /// - [`ClientError::UnexpectedRelocationOutcome`] when the outcome
    ///   doesn't match `should_succeed`
    /// - any other error from [`relocate_with`](Self::relocate_with)
    pub async fn relocate(
        &self,
        expected_port: u16,
        use_valid_key: bool,
        should_succeed: bool,
    ) -> Result<(), ClientError> {
        let key = if use_valid_key {
            KeyChoice::Notified
        } else {
            KeyChoice::Empty
        };

        match (self.relocate_with(expected_port, key).await, should_succeed) {
            (Ok(()), true) => Ok(()),
            (Ok(()), false) => Err(ClientError::UnexpectedRelocationOutcome {
                expected: "failure",
                actual: "the new node accepted it".to_string(),
            }),
            (Err(ClientError::RelocateFailure(reason)), false) => {
                tracing::info!(%reason, "relocation rejected as expected");
                Ok(())
            }
            (Err(ClientError::RelocateFailure(reason)), true) => {
                Err(ClientError::UnexpectedRelocationOutcome {
                    expected: "success",
                    actual: format!("the new node rejected it: {reason}"),
                })
            }
            (Err(e), _) => Err(e),
        }
    }

    /// Moves the session to the node named in the relocation notice.
    ///
    /// Waits for the notice first if needed, closes the current
    /// connection, connects to the target, and sends RELOCATE_REQUEST
    /// with the chosen key. On success the new node's reconnect key is
    /// installed and the session is `LoggedIn` there.
    ///
    /// # Errors
    /// - [`ClientError::RelocateFailure`] with the new node's reason; the
    ///   session is left `Disconnected`
    /// - [`ClientError::RelocateTimeout`]; the session is left
    ///   `Disconnected`
    /// - anything [`wait_for_relocation_notification`] or
    ///   [`connect`](Self::connect) returns
    ///
    /// [`wait_for_relocation_notification`]: Self::wait_for_relocation_notification
    pub async fn relocate_with(
        &self,
        expected_port: u16,
        key: KeyChoice,
    ) -> Result<(), ClientError> {
        let notice = self.wait_for_relocation_notification(expected_port).await?;
        let relocation_key = match key {
            KeyChoice::Notified => notice.key.clone(),
            KeyChoice::Empty => SessionKey::empty(),
            KeyChoice::Other(key) => key,
        };
        let request = encode(&Message::RelocateRequest {
            version: self.config.protocol_version,
            relocation_key,
        })?;

        let old = {
            let mut inner = self.shared.inner.lock().await;
            if inner.state != SessionState::RelocationNoticeReceived {
                return Err(ClientError::InvalidState {
                    operation: "relocate",
                    state: inner.state,
                });
            }
            inner.state = SessionState::Relocating;
            inner.connection.take()
        };
        self.shared.notify();
        if let Some(old) = old {
            let _ = old.close().await;
        }
        tracing::info!(to = %notice.address, "relocating");

        let result = self.finish_relocation(&notice.address, request).await;

        let mut inner = self.shared.inner.lock().await;
        if inner.relocation.as_ref() == Some(&notice) {
            inner.relocation = None;
        }
        result
    }

    async fn finish_relocation(
        &self,
        target: &Address,
        request: Bytes,
    ) -> Result<(), ClientError> {
        const OPERATION: &str = "relocate";
        {
            let mut inner = self.shared.inner.lock().await;
            if inner.state != SessionState::Relocating {
                return Err(ClientError::ConnectionLost { operation: OPERATION });
            }
            self.start_connect(&mut inner, target.clone(), SessionState::Relocating);
        }
        self.shared.notify();
        self.finish_connect(target).await?;

        let deadline = Instant::now() + self.config.request_timeout();
        let handle = {
            let mut inner = self.shared.inner.lock().await;
            if inner.state != SessionState::Relocating {
                return Err(ClientError::ConnectionLost { operation: OPERATION });
            }
            let handle = inner.connection.clone().ok_or(ClientError::NotConnected)?;
            inner.relocate.begin();
            inner.state = SessionState::AwaitingRelocationAck;
            handle
        };
        self.shared.notify();

        if let Err(e) = handle.send(&request).await {
            self.disconnect().await;
            return Err(e.into());
        }

        let reply = self
            .wait_until(deadline, |inner| inner.relocate.take(), |inner| inner.relocate.cancel())
            .await;

        match reply {
            Ok(Ok(RelocateReply::Success)) => Ok(()),
            Ok(Ok(RelocateReply::Failure(reason))) => {
                self.disconnect().await;
                Err(ClientError::RelocateFailure(reason))
            }
            Ok(Err(abort)) => {
                self.disconnect().await;
                Err(abort.into_error(OPERATION))
            }
            Err(()) => {
                tracing::warn!(to = %target, "relocation timed out");
                self.disconnect().await;
                Err(ClientError::RelocateTimeout(self.config.request_timeout()))
            }
        }
    }

    // -- logout / disconnect -----------------------------------------------

    /// Logs out and closes the connection.
    ///
    /// Does nothing if already `Disconnected`. The connection is closed
    /// whether or not the node acknowledges; a successful logout also
    /// forgets the reconnect key (the node has revoked it).
    ///
    /// # Errors
    /// [`ClientError::LogoutTimeout`] if the acknowledgement never came.
    /// This is a soft failure (`is_fatal() == false`): the session is
    /// `Disconnected` either way.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let request = encode(&Message::LogoutRequest)?;
        let deadline = Instant::now() + self.config.request_timeout();

        let handle = {
            let mut inner = self.shared.inner.lock().await;
            match inner.state {
                SessionState::Disconnected => return Ok(()),
                SessionState::AwaitingLogoutAck | SessionState::Disconnecting => {
                    return Err(ClientError::InvalidState {
                        operation: "log out",
                        state: inner.state,
                    });
                }
                _ => {}
            }
            let handle = inner.connection.clone();
            if handle.is_some() {
                inner.logout.begin();
                inner.state = SessionState::AwaitingLogoutAck;
            }
            handle
        };

        let Some(handle) = handle else {
            // Still connecting: nothing to log out of.
            self.disconnect().await;
            return Ok(());
        };
        self.shared.notify();

        let outcome = match handle.send(&request).await {
            Ok(()) => {
                self.wait_until(deadline, |inner| inner.logout.take(), |inner| inner.logout.cancel())
                    .await
            }
            Err(e) => {
                self.disconnect().await;
                return Err(e.into());
            }
        };
        self.disconnect().await;

        match outcome {
            Ok(Ok(())) => {
                tracing::info!("logged out");
                Ok(())
            }
            Ok(Err(abort)) => Err(abort.into_error("logout")),
            Err(()) => {
                tracing::warn!("logout not acknowledged, closed anyway");
                Err(ClientError::LogoutTimeout(self.config.request_timeout()))
            }
        }
    }

    /// Closes the connection and resets to `Disconnected`.
    ///
    /// Idempotent. Any operation waiting on the node fails with
    /// [`ClientError::ConnectionLost`]. The reconnect key is kept.
    pub async fn disconnect(&self) {
        let handle = {
            let mut inner = self.shared.inner.lock().await;
            let idle = matches!(
                inner.state,
                SessionState::Disconnected | SessionState::Disconnecting
            ) && inner.connection.is_none()
                && inner.pending_connect.is_none();
            if idle {
                return;
            }
            inner.state = SessionState::Disconnecting;
            inner.teardown(Abort::ConnectionLost)
        };
        self.shared.notify();

        if let Some(handle) = handle {
            tracing::debug!(id = %handle.id(), "disconnecting");
            let _ = handle.close().await;
        }

        let mut inner = self.shared.inner.lock().await;
        if inner.state == SessionState::Disconnecting {
            inner.state = SessionState::Disconnected;
        }
        drop(inner);
        self.shared.notify();
    }

    /// Waits up to `timeout` for the session to become `Disconnected`.
    /// Returns whether it did.
    pub async fn wait_for_disconnect(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.wait_until(
            deadline,
            |inner| (inner.state == SessionState::Disconnected).then_some(()),
            |_| (),
        )
        .await
        .is_ok()
    }

    // -- application traffic -----------------------------------------------

    /// Sends a SESSION_MESSAGE. Requires a logged-in session.
    pub async fn send_message(&self, payload: impl Into<Bytes>) -> Result<(), ClientError> {
        let frame = encode(&Message::SessionMessage {
            payload: payload.into(),
        })?;
        let handle = {
            let inner = self.shared.inner.lock().await;
            if !inner.state.is_logged_in() {
                return Err(match inner.state {
                    SessionState::Disconnected => ClientError::NotConnected,
                    state => ClientError::InvalidState {
                        operation: "send a session message",
                        state,
                    },
                });
            }
            inner.connection.clone().ok_or(ClientError::NotConnected)?
        };
        handle.send(&frame).await?;
        Ok(())
    }

    /// Sends `frame` as-is on the current connection. The bytes are not
    /// checked; this is how application opcodes outside the session
    /// protocol go out.
    pub async fn send_raw(&self, frame: &[u8]) -> Result<(), ClientError> {
        let handle = {
            let inner = self.shared.inner.lock().await;
            inner.connection.clone().ok_or(ClientError::NotConnected)?
        };
        handle.send(frame).await?;
        Ok(())
    }

    // -- accessors ---------------------------------------------------------

    pub async fn state(&self) -> SessionState {
        self.shared.inner.lock().await.state
    }

    /// The current reconnect key; empty before the first login.
    pub async fn reconnect_key(&self) -> SessionKey {
        self.shared.inner.lock().await.reconnect_key.clone()
    }

    /// The relocation notice received and not yet acted on, if any.
    pub async fn relocation_notice(&self) -> Option<RelocationNotice> {
        self.shared.inner.lock().await.relocation.clone()
    }

    /// Where the last LOGIN_REDIRECT pointed.
    pub async fn redirect_address(&self) -> Option<Address> {
        self.shared.inner.lock().await.redirect.clone()
    }

    /// The address of the last connect attempt (the current node while
    /// connected).
    pub async fn connect_address(&self) -> Option<Address> {
        self.shared.inner.lock().await.connect_address.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.inner.lock().await.connection.is_some()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.shared.inner.lock().await.state.is_logged_in()
    }

    /// Name used by the last login attempt.
    pub async fn name(&self) -> Option<String> {
        self.shared.inner.lock().await.name.clone()
    }

    // -- waiting -----------------------------------------------------------

    /// Re-checks `check` under the lock after every transition until it
    /// yields a value or `deadline` passes. On expiry `on_timeout` runs
    /// under the same lock, so an ack can't slip in between the last check
    /// and the cleanup.
    async fn wait_until<T, R>(
        &self,
        deadline: Instant,
        mut check: impl FnMut(&mut Inner<K::Connection>) -> Option<T>,
        on_timeout: impl FnOnce(&mut Inner<K::Connection>) -> R,
    ) -> Result<T, R> {
        let mut signal = self.shared.signal.subscribe();
        loop {
            {
                let mut inner = self.shared.inner.lock().await;
                if let Some(value) = check(&mut inner) {
                    return Ok(value);
                }
                if Instant::now() >= deadline {
                    return Err(on_timeout(&mut inner));
                }
            }
            if let Ok(Err(_)) = tokio::time::timeout_at(deadline, signal.changed()).await {
                tokio::time::sleep_until(deadline).await;
            }
        }
    }
}

impl<K: Connector, H: SessionHandler> Drop for ClientSession<K, H> {
    fn drop(&mut self) {
        self.pump.abort();
        let Ok(mut inner) = self.shared.inner.try_lock() else {
            return;
        };
        if let Some(pending) = inner.pending_connect.take() {
            pending.abort();
        }
        if let Some(handle) = inner.connection.take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = handle.close().await;
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Event task
// ---------------------------------------------------------------------------

/// Work the pump does after releasing the lock.
enum Effect<C> {
    KeyChanged(SessionKey),
    Heartbeat(Handle<C>),
    Deliver(Bytes),
    Unknown(u8, Bytes),
    Close(Handle<C>),
    Lost,
}

async fn pump<C: Connection, H: SessionHandler>(
    shared: Arc<Shared<C, H>>,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent<C>>,
) {
    while let Some(event) = events.recv().await {
        let effects = match event {
            ConnectionEvent::Connected(handle) => on_connected(&shared, handle).await,
            ConnectionEvent::Bytes(id, bytes) => on_bytes(&shared, id, bytes).await,
            ConnectionEvent::Error(id, reason) => on_error(&shared, id, reason).await,
            ConnectionEvent::Disconnected(id) => on_disconnected(&shared, id).await,
        };
        run_effects(&shared, effects).await;
        shared.notify();
    }
}

async fn on_connected<C: Connection, H>(
    shared: &Shared<C, H>,
    handle: Handle<C>,
) -> Vec<Effect<C>> {
    let mut inner = shared.inner.lock().await;
    if !inner.is_connecting(handle.id()) {
        tracing::debug!(id = %handle.id(), "closing connection nobody is waiting for");
        return vec![Effect::Close(handle)];
    }
    inner.pending_connect = None;
    if inner.state == SessionState::Connecting {
        inner.state = SessionState::Connected;
    }
    inner.connect.resolve(Ok(()));
    inner.connection = Some(handle);
    Vec::new()
}

async fn on_error<C: Connection, H>(
    shared: &Shared<C, H>,
    id: ConnectionId,
    reason: String,
) -> Vec<Effect<C>> {
    let mut inner = shared.inner.lock().await;
    if inner.is_connecting(id) {
        inner.connect_failed(reason);
    } else if inner.is_current(id) {
        tracing::warn!(%id, error = %reason, "connection error");
    } else {
        tracing::debug!(%id, error = %reason, "error on stale connection");
    }
    Vec::new()
}

async fn on_disconnected<C: Connection, H>(
    shared: &Shared<C, H>,
    id: ConnectionId,
) -> Vec<Effect<C>> {
    let mut inner = shared.inner.lock().await;
    if inner.is_connecting(id) {
        inner.connect_failed("closed before connecting".to_string());
        Vec::new()
    } else if inner.is_current(id) {
        tracing::info!(%id, state = %inner.state, "connection lost");
        inner.teardown(Abort::ConnectionLost);
        inner.state = SessionState::Disconnected;
        vec![Effect::Lost]
    } else {
        tracing::debug!(%id, "stale connection closed");
        Vec::new()
    }
}

async fn on_bytes<C: Connection, H>(
    shared: &Shared<C, H>,
    id: ConnectionId,
    bytes: Vec<u8>,
) -> Vec<Effect<C>> {
    let decoded = decode(Bytes::from(bytes));
    let mut inner = shared.inner.lock().await;
    if !inner.is_current(id) {
        tracing::debug!(%id, "dropping message from stale connection");
        return Vec::new();
    }

    match decoded {
        Ok(message) => dispatch(&mut inner, message),
        Err(e) => {
            tracing::warn!(%id, error = %e, "malformed message, closing connection");
            let handle = inner.teardown(Abort::Framing(e));
            inner.state = SessionState::Disconnected;
            let mut effects: Vec<_> = handle.into_iter().map(Effect::Close).collect();
            effects.push(Effect::Lost);
            effects
        }
    }
}

/// Applies one decoded message to the state.
fn dispatch<C>(inner: &mut Inner<C>, message: Message) -> Vec<Effect<C>> {
    match message {
        Message::LoginSuccess { reconnect_key } => {
            if !inner.login.is_waiting() {
                tracing::warn!("LOGIN_SUCCESS with no login pending, ignored");
                return Vec::new();
            }
            tracing::info!(session = ?inner.name, "login succeeded");
            inner.login.resolve(Ok(LoginReply::Success));
            authenticated(inner, reconnect_key)
        }
        Message::LoginFailure { reason } => {
            if inner.login.resolve(Ok(LoginReply::Failure(reason))) {
                inner.state = SessionState::Connected;
            } else {
                tracing::warn!("LOGIN_FAILURE with no login pending, ignored");
            }
            Vec::new()
        }
        Message::LoginRedirect { host, port } => {
            if !inner.login.is_waiting() {
                tracing::warn!("LOGIN_REDIRECT with no login pending, ignored");
                return Vec::new();
            }
            inner.redirect = Address::from_wire(&host, port).ok();
            inner.state = SessionState::Connected;
            inner.login.resolve(Ok(LoginReply::Redirect { host, port }));
            Vec::new()
        }
        Message::RelocateNotification {
            host,
            port,
            relocation_key,
        } => {
            if !inner.state.is_logged_in() {
                tracing::warn!(state = %inner.state, "relocation notice while not logged in, ignored");
                return Vec::new();
            }
            match Address::from_wire(&host, port) {
                Ok(address) => {
                    tracing::info!(to = %address, "relocation notice received");
                    inner.relocation = Some(RelocationNotice {
                        address,
                        key: relocation_key,
                    });
                    inner.state = SessionState::RelocationNoticeReceived;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "relocation notice with unusable address, ignored");
                }
            }
            Vec::new()
        }
        Message::RelocateSuccess { reconnect_key } => {
            if !inner.relocate.is_waiting() {
                tracing::warn!("RELOCATE_SUCCESS with no relocation pending, ignored");
                return Vec::new();
            }
            tracing::info!(session = ?inner.name, "session relocated");
            inner.relocate.resolve(Ok(RelocateReply::Success));
            authenticated(inner, reconnect_key)
        }
        Message::RelocateFailure { reason } => {
            if !inner.relocate.resolve(Ok(RelocateReply::Failure(reason))) {
                tracing::warn!("RELOCATE_FAILURE with no relocation pending, ignored");
            }
            Vec::new()
        }
        Message::LogoutSuccess => {
            if inner.logout.resolve(Ok(())) {
                inner.reconnect_key = SessionKey::empty();
            } else {
                tracing::warn!("LOGOUT_SUCCESS with no logout pending, ignored");
            }
            Vec::new()
        }
        Message::SessionMessage { payload } => vec![Effect::Deliver(payload)],
        Message::Unknown { opcode, payload } => vec![Effect::Unknown(opcode, payload)],
        other @ (Message::LoginRequest { .. }
        | Message::RelocateRequest { .. }
        | Message::LogoutRequest) => {
            tracing::warn!(opcode = other.opcode_byte(), "node sent a client request, ignored");
            Vec::new()
        }
    }
}

/// LOGIN_SUCCESS or RELOCATE_SUCCESS: install the key exactly once and
/// queue the heartbeat.
fn authenticated<C>(inner: &mut Inner<C>, key: SessionKey) -> Vec<Effect<C>> {
    inner.reconnect_key = key.clone();
    inner.state = SessionState::LoggedIn;
    let mut effects = vec![Effect::KeyChanged(key)];
    if let Some(handle) = inner.connection.clone() {
        effects.push(Effect::Heartbeat(handle));
    }
    effects
}

async fn run_effects<C: Connection, H: SessionHandler>(
    shared: &Shared<C, H>,
    effects: Vec<Effect<C>>,
) {
    for effect in effects {
        match effect {
            Effect::KeyChanged(key) => shared.handler.reconnect_key_changed(&key),
            Effect::Heartbeat(handle) => match encode(&Message::heartbeat()) {
                Ok(frame) => {
                    if let Err(e) = handle.send(&frame).await {
                        tracing::debug!(id = %handle.id(), error = %e, "heartbeat not sent");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "heartbeat encode failed"),
            },
            Effect::Deliver(payload) => shared.handler.session_message(payload),
            Effect::Unknown(opcode, payload) => shared.handler.unknown_message(opcode, payload),
            Effect::Close(handle) => {
                let _ = handle.close().await;
            }
            Effect::Lost => shared.handler.disconnected(),
        }
    }
}
