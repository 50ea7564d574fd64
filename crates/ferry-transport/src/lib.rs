//! Transport abstraction layer for Ferry.
//!
//! Provides the [`Transport`], [`Connector`], and [`Connection`] traits that
//! abstract over the reliable, message-preserving byte streams a session
//! runs on, plus a small driver ([`open`]) that turns one outbound
//! connection into an ordered stream of [`ConnectionEvent`]s.
//!
//! The transport never looks inside a payload. Every `send` is one message
//! and every `recv` returns one message: framing belongs below this layer
//! (WebSocket frames, in the default implementation).
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

mod driver;
mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use driver::{ConnectionEvent, Handle, PendingConnect, open};
pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketConnector, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating process-unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
///
/// On the outbound side the ID is assigned when the connect attempt starts,
/// so a failure that happens before the socket exists can still be matched
/// against the attempt that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next unused ID.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A node address: host name (or IP literal) plus TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    /// Creates an address from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Builds an address from the `(host, i32 port)` pair carried on the
    /// wire, rejecting ports outside `0..=65535` and empty hosts.
    pub fn from_wire(host: &str, port: i32) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidAddress {
            host: host.to_string(),
            port,
        };
        if host.is_empty() {
            return Err(invalid());
        }
        let port = u16::try_from(port).map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }

    /// Returns the port in the signed form used on the wire.
    pub fn wire_port(&self) -> i32 {
        i32::from(self.port)
    }
}

impl From<std::net::SocketAddr> for Address {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

/// Opens outbound connections.
///
/// A connector is shared by every connect attempt a session makes (first
/// login, redirect hops, relocation), so it's held behind an `Arc` and must
/// be `Send + Sync`.
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection;

    /// Connects to `address`. Resolves once the connection is usable.
    fn connect(
        &self,
        address: &Address,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// A single connection that can send and receive whole messages.
///
/// The futures are `Send` so the driver can run them on any runtime
/// worker thread.
pub trait Connection: Send + Sync + 'static {
    /// Sends one message to the remote peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_next_is_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_address_display() {
        assert_eq!(Address::new("node-y", 9000).to_string(), "node-y:9000");
    }

    #[test]
    fn test_address_from_wire_accepts_valid_port() {
        let addr = Address::from_wire("10.0.0.5", 9100).unwrap();
        assert_eq!(addr, Address::new("10.0.0.5", 9100));
        assert_eq!(addr.wire_port(), 9100);
    }

    #[test]
    fn test_address_from_wire_rejects_out_of_range_port() {
        assert!(matches!(
            Address::from_wire("host", -1),
            Err(TransportError::InvalidAddress { port: -1, .. })
        ));
        assert!(Address::from_wire("host", 70_000).is_err());
    }

    #[test]
    fn test_address_from_wire_rejects_empty_host() {
        assert!(Address::from_wire("", 9000).is_err());
    }

    #[test]
    fn test_address_from_socket_addr() {
        let sock: std::net::SocketAddr = "127.0.0.1:4242".parse().unwrap();
        assert_eq!(Address::from(sock), Address::new("127.0.0.1", 4242));
    }
}
