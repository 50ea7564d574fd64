//! Session lifecycle states and the values operations resolve to.

use std::fmt;

use ferry_protocol::{ProtocolError, SessionKey};
use ferry_transport::Address;

use crate::ClientError;

/// Where a [`ClientSession`](crate::ClientSession) is in its lifecycle.
///
/// ```text
/// Disconnected ──connect──→ Connecting ──→ Connected ──login──→ AwaitingLoginAck
///      ↑                                      ↑  (failure/redirect)    │ success
///      │                                      └────────────────────────┤
///      │                                                               ▼
///      │   AwaitingRelocationAck ←── Relocating ←──relocate── RelocationNoticeReceived
///      │          │ success                                            ↑ notice
///      │          └──────────────────────────────────────────→ LoggedIn
///      │                                                               │ logout
///      └──────────── Disconnecting ←──────────── AwaitingLogoutAck ←───┘
/// ```
///
/// Waiting for a relocation notice is not a state of its own: it is what
/// a `LoggedIn` session does until a RELOCATE_NOTIFICATION arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No connection. Initial and terminal state of every connect cycle.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected but not authenticated.
    Connected,
    /// LOGIN_REQUEST sent, waiting for the node's verdict.
    AwaitingLoginAck,
    /// Authenticated; holds a reconnect key.
    LoggedIn,
    /// Authenticated, and the node asked us to move.
    RelocationNoticeReceived,
    /// Connecting to the relocation target.
    Relocating,
    /// RELOCATE_REQUEST sent to the new node, waiting for its verdict.
    AwaitingRelocationAck,
    /// LOGOUT_REQUEST sent.
    AwaitingLogoutAck,
    /// Tearing the connection down.
    Disconnecting,
}

impl SessionState {
    /// Returns `true` in the states where the session is authenticated on
    /// its current node.
    pub fn is_logged_in(self) -> bool {
        matches!(self, Self::LoggedIn | Self::RelocationNoticeReceived)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::AwaitingLoginAck => "awaiting login ack",
            Self::LoggedIn => "logged in",
            Self::RelocationNoticeReceived => "relocation notice received",
            Self::Relocating => "relocating",
            Self::AwaitingRelocationAck => "awaiting relocation ack",
            Self::AwaitingLogoutAck => "awaiting logout ack",
            Self::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A RELOCATE_NOTIFICATION the session has received but not yet acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationNotice {
    /// The node to move to.
    pub address: Address,
    /// Single-use key authorising the move.
    pub key: SessionKey,
}

/// Result of one login attempt that didn't fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The node accepted the credentials.
    LoggedIn,
    /// The node told us to log in somewhere else instead.
    Redirected(Address),
}

/// Which key a RELOCATE_REQUEST carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyChoice {
    /// The key from the relocation notice.
    Notified,
    /// No key at all. A correct node always rejects this.
    Empty,
    /// Any other key, e.g. one captured from an earlier relocation.
    Other(SessionKey),
}

// ---------------------------------------------------------------------------
// Pending requests (crate-internal)
// ---------------------------------------------------------------------------

/// One request slot. Resolved at most once per [`begin`](Self::begin).
///
/// The event task resolves, the waiting operation takes. Whichever of
/// "ack arrives" and "deadline passes" gets the session lock first wins;
/// the loser sees a slot that is no longer `Waiting` and does nothing.
#[derive(Debug, Default)]
pub(crate) enum Pending<T> {
    #[default]
    Idle,
    Waiting,
    Done(T),
}

impl<T> Pending<T> {
    pub(crate) fn begin(&mut self) {
        *self = Self::Waiting;
    }

    pub(crate) fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// Stores `value` if a request is waiting. Returns whether it did.
    pub(crate) fn resolve(&mut self, value: T) -> bool {
        if self.is_waiting() {
            *self = Self::Done(value);
            true
        } else {
            false
        }
    }

    pub(crate) fn take(&mut self) -> Option<T> {
        match std::mem::take(self) {
            Self::Done(value) => Some(value),
            other => {
                *self = other;
                None
            }
        }
    }

    pub(crate) fn cancel(&mut self) {
        *self = Self::Idle;
    }
}

/// Why a waiting request ended without an answer from the node.
#[derive(Debug, Clone)]
pub(crate) enum Abort {
    ConnectionLost,
    Framing(ProtocolError),
}

impl Abort {
    pub(crate) fn into_error(self, operation: &'static str) -> ClientError {
        match self {
            Self::ConnectionLost => ClientError::ConnectionLost { operation },
            Self::Framing(e) => ClientError::Framing(e),
        }
    }

    pub(crate) fn reason(&self) -> String {
        match self {
            Self::ConnectionLost => "connection lost".to_string(),
            Self::Framing(e) => e.to_string(),
        }
    }
}

/// The node's answer to LOGIN_REQUEST.
#[derive(Debug)]
pub(crate) enum LoginReply {
    Success,
    Failure(String),
    Redirect { host: String, port: i32 },
}

/// The node's answer to RELOCATE_REQUEST.
#[derive(Debug)]
pub(crate) enum RelocateReply {
    Success,
    Failure(String),
}
