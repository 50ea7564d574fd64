//! Connection driver: turns one outbound connect attempt into events.
//!
//! The session layer doesn't poll sockets. It calls [`open`], gets back a
//! [`PendingConnect`] immediately, and then receives [`ConnectionEvent`]s on
//! a channel:
//!
//! ```text
//! open() ──→ Connected(handle) ──→ Bytes ... Bytes ──→ Disconnected
//!    │
//!    └─────→ Error(reason) ──→ Disconnected        (connect failed)
//! ```
//!
//! Every connection gets its own task, so events for one connection are
//! strictly ordered and never delivered concurrently with each other.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::{Address, Connection, ConnectionId, Connector, TransportError};

const PENDING: u8 = 0;
const CONNECTED: u8 = 1;
const ABORTED: u8 = 2;
const FAILED: u8 = 3;

/// Something that happened on a connection opened by [`open`].
pub enum ConnectionEvent<C> {
    /// The connect attempt completed. Delivered at most once per attempt.
    Connected(Handle<C>),
    /// One complete message arrived.
    Bytes(ConnectionId, Vec<u8>),
    /// The connection is gone (or never came up). Always the last event.
    Disconnected(ConnectionId),
    /// A transport error, either a failed connect or a failed receive.
    Error(ConnectionId, String),
}

impl<C> ConnectionEvent<C> {
    /// Returns the connection this event belongs to.
    pub fn id(&self) -> ConnectionId {
        match self {
            Self::Connected(handle) => handle.id(),
            Self::Bytes(id, _) | Self::Disconnected(id) | Self::Error(id, _) => {
                *id
            }
        }
    }
}

impl<C> fmt::Debug for ConnectionEvent<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(handle) => {
                f.debug_tuple("Connected").field(&handle.id()).finish()
            }
            Self::Bytes(id, bytes) => f
                .debug_tuple("Bytes")
                .field(id)
                .field(&bytes.len())
                .finish(),
            Self::Disconnected(id) => {
                f.debug_tuple("Disconnected").field(id).finish()
            }
            Self::Error(id, reason) => {
                f.debug_tuple("Error").field(id).field(reason).finish()
            }
        }
    }
}

/// A live connection produced by a successful connect attempt.
///
/// Cheap to clone; all clones refer to the same connection. Once closed
/// (by either side) every `send` fails with [`TransportError::NotConnected`].
pub struct Handle<C> {
    id: ConnectionId,
    conn: Arc<C>,
    open: Arc<AtomicBool>,
}

impl<C> Clone for Handle<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            conn: Arc::clone(&self.conn),
            open: Arc::clone(&self.open),
        }
    }
}

impl<C> fmt::Debug for Handle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl<C> Handle<C> {
    /// The identity of this connection (the ID of the attempt that made it).
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `true` until the connection is closed by either side.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl<C: Connection> Handle<C> {
    fn new(id: ConnectionId, conn: C) -> Self {
        Self {
            id,
            conn: Arc::new(conn),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Sends one message.
    ///
    /// # Errors
    /// [`TransportError::NotConnected`] if the handle is closed, otherwise
    /// whatever the underlying connection reports.
    pub async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        self.conn.send(data).await
    }

    /// Closes the connection. Only the first call does anything.
    pub async fn close(&self) -> Result<(), TransportError> {
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::debug!(id = %self.id, "closing connection");
            self.conn.close().await
        } else {
            Ok(())
        }
    }
}

/// A connect attempt that may still be in flight.
///
/// Dropping it does NOT cancel the attempt; call [`abort`](Self::abort).
#[derive(Debug)]
pub struct PendingConnect {
    id: ConnectionId,
    address: Address,
    phase: Arc<AtomicU8>,
    task: AbortHandle,
}

impl PendingConnect {
    /// The ID the resulting connection (or failure events) will carry.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Where this attempt is connecting to.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Returns `true` while the attempt has neither completed nor failed
    /// nor been aborted.
    pub fn is_pending(&self) -> bool {
        self.phase.load(Ordering::Acquire) == PENDING
    }

    /// Aborts the attempt if it is still pending.
    ///
    /// Returns `true` for the one call that actually aborted it. Calling
    /// this after the attempt connected (or failed, or was already aborted)
    /// does nothing and returns `false`; an established connection is never
    /// touched.
    pub fn abort(&self) -> bool {
        let aborted = self
            .phase
            .compare_exchange(PENDING, ABORTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if aborted {
            self.task.abort();
            tracing::debug!(id = %self.id, address = %self.address, "connect aborted");
        }
        aborted
    }
}

/// Starts connecting to `address` and returns immediately.
///
/// Must be called from within a Tokio runtime. All events for the new
/// connection are sent on `events`, tagged with [`PendingConnect::id`].
pub fn open<K: Connector>(
    connector: Arc<K>,
    address: Address,
    events: mpsc::UnboundedSender<ConnectionEvent<K::Connection>>,
) -> PendingConnect {
    let id = ConnectionId::next();
    let phase = Arc::new(AtomicU8::new(PENDING));
    let task = tokio::spawn(drive(
        connector,
        address.clone(),
        id,
        Arc::clone(&phase),
        events,
    ));
    tracing::debug!(%id, %address, "connect started");

    PendingConnect {
        id,
        address,
        phase,
        task: task.abort_handle(),
    }
}

/// The per-connection task: connect, then pump `recv` into events.
async fn drive<K: Connector>(
    connector: Arc<K>,
    address: Address,
    id: ConnectionId,
    phase: Arc<AtomicU8>,
    events: mpsc::UnboundedSender<ConnectionEvent<K::Connection>>,
) {
    let conn = match connector.connect(&address).await {
        Ok(conn) => conn,
        Err(e) => {
            let failed = phase
                .compare_exchange(PENDING, FAILED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if failed {
                tracing::debug!(%id, %address, error = %e, "connect failed");
                let _ = events.send(ConnectionEvent::Error(id, e.to_string()));
                let _ = events.send(ConnectionEvent::Disconnected(id));
            }
            return;
        }
    };

    let won = phase
        .compare_exchange(PENDING, CONNECTED, Ordering::AcqRel, Ordering::Acquire)
        .is_ok();
    if !won {
        // Aborted while the handshake was in flight.
        let _ = conn.close().await;
        return;
    }

    let handle = Handle::new(id, conn);
    if events.send(ConnectionEvent::Connected(handle.clone())).is_err() {
        let _ = handle.close().await;
        return;
    }

    loop {
        match handle.conn.recv().await {
            Ok(Some(bytes)) => {
                if events.send(ConnectionEvent::Bytes(id, bytes)).is_err() {
                    // Nobody is listening any more.
                    let _ = handle.close().await;
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = events.send(ConnectionEvent::Error(id, e.to_string()));
                break;
            }
        }
    }

    handle.mark_closed();
    tracing::debug!(%id, "connection ended");
    let _ = events.send(ConnectionEvent::Disconnected(id));
}
