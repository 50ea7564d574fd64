//! Unified error type for the Ferry framework.

use ferry_client::ClientError;
use ferry_protocol::ProtocolError;
use ferry_session::SessionError;
use ferry_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `ferry` facade crate you deal with this single error
/// type instead of importing errors from each sub-crate; `?` converts
/// sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum FerryError {
    /// Connection, send, receive, bind.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Malformed bytes on the wire.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Authentication, unknown session, bad key.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A client session operation failed.
    #[error(transparent)]
    Client(#[from] ClientError),
}
