//! Error types for the protocol layer.
//!
//! Every variant here is a framing error: the bytes on the wire don't form
//! a well-formed message. A connection that produced one is out of sync with
//! its peer and must be closed; nothing after it can be trusted.

use crate::Opcode;

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The message had no bytes at all, so not even an opcode.
    #[error("empty message")]
    Empty,

    /// A field ran past the end of the message.
    #[error("truncated {field}: need {needed} bytes, {remaining} left")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// A string field wasn't valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// Bytes were left over after the last field of a fixed-layout message.
    #[error("{extra} unexpected trailing bytes after {opcode:?}")]
    TrailingBytes { opcode: Opcode, extra: usize },

    /// A string is too long for its 2-byte length prefix (encode only).
    #[error("{field} is {len} bytes, longer than the 65535-byte limit")]
    StringTooLong { field: &'static str, len: usize },
}
