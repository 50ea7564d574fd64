//! Error types for the client session.

use std::time::Duration;

use ferry_protocol::ProtocolError;
use ferry_transport::{Address, TransportError};

use crate::SessionState;

/// Everything a [`ClientSession`](crate::ClientSession) operation can fail
/// with.
///
/// Timeouts ("the node never answered") are kept apart from rejections
/// ("the node said no"); see [`is_timeout`](Self::is_timeout). None of
/// these are retried by the session itself.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The transport didn't come up before the connect deadline. The
    /// attempt was aborted.
    #[error("connect to {address} timed out")]
    ConnectTimeout { address: Address },

    /// The transport reported a failure before connecting.
    #[error("connect to {address} failed: {reason}")]
    ConnectFailed { address: Address, reason: String },

    /// LOGIN_FAILURE: the node rejected the credentials.
    #[error("login rejected: {0}")]
    LoginFailure(String),

    /// No LOGIN_SUCCESS / LOGIN_FAILURE / LOGIN_REDIRECT in time.
    #[error("no login acknowledgement within {0:?}")]
    LoginTimeout(Duration),

    /// The redirect chain was longer than `max_redirects`.
    #[error("gave up after following {hops} login redirects")]
    TooManyRedirects { hops: u32 },

    /// No RELOCATE_NOTIFICATION in time.
    #[error("no relocation notification within {0:?}")]
    RelocationTimeout(Duration),

    /// The node asked us to relocate somewhere other than expected.
    #[error("relocation notice names port {actual}, expected {expected}")]
    RelocationMismatch { expected: u16, actual: u16 },

    /// RELOCATE_FAILURE: the new node rejected the relocation.
    #[error("relocation rejected: {0}")]
    RelocateFailure(String),

    /// No RELOCATE_SUCCESS / RELOCATE_FAILURE in time.
    #[error("no relocation acknowledgement within {0:?}")]
    RelocateTimeout(Duration),

    /// A relocation succeeded when it was expected to fail, or the other
    /// way round.
    #[error("relocation expected to end in {expected}, but {actual}")]
    UnexpectedRelocationOutcome {
        expected: &'static str,
        actual: String,
    },

    /// No LOGOUT_SUCCESS in time. The connection was closed anyway.
    #[error("no logout acknowledgement within {0:?}")]
    LogoutTimeout(Duration),

    /// The peer sent bytes that don't decode. The connection was closed.
    #[error("malformed message from node: {0}")]
    Framing(#[from] ProtocolError),

    /// The operation needs a live connection and there isn't one.
    #[error("not connected")]
    NotConnected,

    /// The connection went away while `operation` was waiting.
    #[error("connection lost during {operation}")]
    ConnectionLost { operation: &'static str },

    /// `operation` isn't allowed in the session's current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ClientError {
    /// Returns `true` if the node simply didn't answer in time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout { .. }
                | Self::LoginTimeout(_)
                | Self::RelocationTimeout(_)
                | Self::RelocateTimeout(_)
                | Self::LogoutTimeout(_)
        )
    }

    /// Returns `false` for soft failures that were already handled
    /// locally. A logout timeout still tore the connection down, so the
    /// caller got what it asked for.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::LogoutTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_timeout_separates_timeouts_from_rejections() {
        let timeout = ClientError::LoginTimeout(Duration::from_secs(5));
        let rejected = ClientError::LoginFailure("bad password".into());

        assert!(timeout.is_timeout());
        assert!(!rejected.is_timeout());
    }

    #[test]
    fn test_is_fatal_logout_timeout_is_soft() {
        assert!(!ClientError::LogoutTimeout(Duration::from_secs(5)).is_fatal());
        assert!(ClientError::RelocateTimeout(Duration::from_secs(5)).is_fatal());
        assert!(ClientError::NotConnected.is_fatal());
    }

    #[test]
    fn test_invalid_state_message_names_operation_and_state() {
        let err = ClientError::InvalidState {
            operation: "connect",
            state: SessionState::LoggedIn,
        };
        assert_eq!(err.to_string(), "cannot connect while logged in");
    }

    #[test]
    fn test_framing_error_converts_from_protocol_error() {
        let err: ClientError = ProtocolError::Empty.into();
        assert!(matches!(err, ClientError::Framing(ProtocolError::Empty)));
    }
}
