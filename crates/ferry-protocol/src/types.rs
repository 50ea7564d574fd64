//! Core protocol types for Ferry's wire format.
//!
//! This module defines every type that travels "on the wire": the one-byte
//! [`Opcode`] that starts each message, the [`Message`] it introduces, and
//! the opaque [`SessionKey`] credentials that login and relocation hand out.

use std::fmt;

use bytes::Bytes;

/// The protocol version carried in LOGIN_REQUEST and RELOCATE_REQUEST.
///
/// Nodes reject requests whose version doesn't match their own.
pub const PROTOCOL_VERSION: u8 = 0x05;

// ---------------------------------------------------------------------------
// Opcode
// ---------------------------------------------------------------------------

/// The first byte of every message. Tells the decoder which layout follows.
///
/// The set is closed: a byte that isn't listed here is not a decoding
/// error but an application-level message (see [`Message::Unknown`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Client → node: "log me in." Version, name, password.
    LoginRequest = 0x10,
    /// Node → client: "you're in." Trailing bytes are the reconnect key.
    LoginSuccess = 0x11,
    /// Node → client: "rejected." Reason string.
    LoginFailure = 0x12,
    /// Node → client: "log in over there instead." Host, port.
    LoginRedirect = 0x13,
    /// Node → client: "move to another node." Host, port, relocation key.
    RelocateNotification = 0x14,
    /// Client → new node: "I was sent here." Version, relocation key.
    RelocateRequest = 0x15,
    /// New node → client: "relocated." Trailing bytes are the reconnect key.
    RelocateSuccess = 0x16,
    /// New node → client: "relocation denied." Reason string.
    RelocateFailure = 0x17,
    /// Either direction: opaque application payload.
    SessionMessage = 0x30,
    /// Client → node: "log me out."
    LogoutRequest = 0x40,
    /// Node → client: "logged out."
    LogoutSuccess = 0x41,
}

impl Opcode {
    /// Maps a raw byte to an opcode, or `None` if it isn't a protocol opcode.
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0x10 => Self::LoginRequest,
            0x11 => Self::LoginSuccess,
            0x12 => Self::LoginFailure,
            0x13 => Self::LoginRedirect,
            0x14 => Self::RelocateNotification,
            0x15 => Self::RelocateRequest,
            0x16 => Self::RelocateSuccess,
            0x17 => Self::RelocateFailure,
            0x30 => Self::SessionMessage,
            0x40 => Self::LogoutRequest,
            0x41 => Self::LogoutSuccess,
            _ => return None,
        })
    }

    /// The wire byte for this opcode.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// SessionKey
// ---------------------------------------------------------------------------

/// An opaque credential: a reconnect key or a relocation key.
///
/// Keys are compared by exact bytes. An empty key means "no key" (what a
/// session holds before its first login), which is different from an
/// invalid key: it simply never matches anything.
///
/// `Bytes` makes clones cheap: the same key is held by the session, the
/// message that carried it, and the log line that mentions it.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct SessionKey(Bytes);

impl SessionKey {
    /// The empty "no key" value.
    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    /// Returns `true` for the "no key" value.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for SessionKey {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for SessionKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&[u8]> for SessionKey {
    fn from(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }
}

/// Lowercase hex, so keys can be logged and compared by eye.
impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({self})")
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One decoded wire message.
///
/// Fields follow the layout table of the wire format: `String` fields are
/// length-prefixed on the wire, `SessionKey`/`Bytes` fields are the
/// remaining bytes of the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    LoginRequest {
        version: u8,
        name: String,
        password: String,
    },
    LoginSuccess {
        reconnect_key: SessionKey,
    },
    LoginFailure {
        reason: String,
    },
    LoginRedirect {
        host: String,
        port: i32,
    },
    RelocateNotification {
        host: String,
        port: i32,
        relocation_key: SessionKey,
    },
    RelocateRequest {
        version: u8,
        relocation_key: SessionKey,
    },
    RelocateSuccess {
        reconnect_key: SessionKey,
    },
    RelocateFailure {
        reason: String,
    },
    LogoutRequest,
    LogoutSuccess,
    SessionMessage {
        payload: Bytes,
    },
    /// Any opcode outside the protocol set, with everything after it.
    /// Forwarded untouched to the application layer.
    Unknown {
        opcode: u8,
        payload: Bytes,
    },
}

impl Message {
    /// The opcode this message is encoded with, or `None` for
    /// [`Message::Unknown`].
    pub fn opcode(&self) -> Option<Opcode> {
        Some(match self {
            Self::LoginRequest { .. } => Opcode::LoginRequest,
            Self::LoginSuccess { .. } => Opcode::LoginSuccess,
            Self::LoginFailure { .. } => Opcode::LoginFailure,
            Self::LoginRedirect { .. } => Opcode::LoginRedirect,
            Self::RelocateNotification { .. } => Opcode::RelocateNotification,
            Self::RelocateRequest { .. } => Opcode::RelocateRequest,
            Self::RelocateSuccess { .. } => Opcode::RelocateSuccess,
            Self::RelocateFailure { .. } => Opcode::RelocateFailure,
            Self::LogoutRequest => Opcode::LogoutRequest,
            Self::LogoutSuccess => Opcode::LogoutSuccess,
            Self::SessionMessage { .. } => Opcode::SessionMessage,
            Self::Unknown { .. } => return None,
        })
    }

    /// The raw opcode byte, including unknown ones.
    pub fn opcode_byte(&self) -> u8 {
        match self {
            Self::Unknown { opcode, .. } => *opcode,
            other => other.opcode().map_or(0, Opcode::as_u8),
        }
    }

    /// Shorthand for an empty SESSION_MESSAGE, the post-login heartbeat.
    pub fn heartbeat() -> Self {
        Self::SessionMessage {
            payload: Bytes::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_from_u8_maps_every_protocol_byte() {
        let all = [
            Opcode::LoginRequest,
            Opcode::LoginSuccess,
            Opcode::LoginFailure,
            Opcode::LoginRedirect,
            Opcode::RelocateNotification,
            Opcode::RelocateRequest,
            Opcode::RelocateSuccess,
            Opcode::RelocateFailure,
            Opcode::SessionMessage,
            Opcode::LogoutRequest,
            Opcode::LogoutSuccess,
        ];
        for op in all {
            assert_eq!(Opcode::from_u8(op.as_u8()), Some(op));
        }
    }

    #[test]
    fn test_opcode_from_u8_unknown_byte_is_none() {
        assert_eq!(Opcode::from_u8(0x00), None);
        assert_eq!(Opcode::from_u8(0x50), None);
        assert_eq!(Opcode::from_u8(0xff), None);
    }

    #[test]
    fn test_session_key_empty_is_distinct_from_nonempty() {
        let none = SessionKey::empty();
        let some = SessionKey::from(vec![1, 2, 3]);
        assert!(none.is_empty());
        assert!(!some.is_empty());
        assert_ne!(none, some);
    }

    #[test]
    fn test_session_key_display_is_hex() {
        let key = SessionKey::from(vec![0x0a, 0xff, 0x00]);
        assert_eq!(key.to_string(), "0aff00");
        assert_eq!(format!("{key:?}"), "SessionKey(0aff00)");
    }

    #[test]
    fn test_message_opcode_byte_for_unknown_keeps_raw_byte() {
        let msg = Message::Unknown {
            opcode: 0x52,
            payload: Bytes::from_static(b"chan"),
        };
        assert_eq!(msg.opcode(), None);
        assert_eq!(msg.opcode_byte(), 0x52);
    }

    #[test]
    fn test_heartbeat_is_empty_session_message() {
        assert_eq!(
            Message::heartbeat(),
            Message::SessionMessage {
                payload: Bytes::new()
            }
        );
        assert_eq!(Message::heartbeat().opcode_byte(), 0x30);
    }
}
