//! Error types for the session layer.

use crate::SessionId;

/// Errors that can occur while authenticating or managing sessions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The [`Authenticator`](crate::Authenticator) rejected the login.
    /// The reason is sent back to the client in LOGIN_FAILURE.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// No session exists with this id (never created, or already logged
    /// out).
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// A presented key didn't match any live key. Covers empty keys,
    /// wrong keys, and keys that were already consumed.
    #[error("invalid session key")]
    InvalidKey,
}
