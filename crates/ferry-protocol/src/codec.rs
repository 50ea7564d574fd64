//! Binary codec: [`Message`] ⇄ bytes.
//!
//! Layout (big-endian, no padding), one message per transport frame:
//!
//! ```text
//! ┌────────┬──────────────────────────────────────────────┐
//! │ opcode │ opcode-specific fields                       │
//! │  u8    │ u8 / i32 / string / remaining bytes          │
//! └────────┴──────────────────────────────────────────────┘
//!
//! string = u16 length ‖ UTF-8 bytes
//! ```
//!
//! Keys and application payloads are always the LAST field and take
//! "whatever is left", so they carry no length prefix of their own.
//!
//! The codec is pure: no I/O, no state. Decoding works on [`Bytes`] so the
//! trailing blobs (keys, payloads) are zero-copy slices of the frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Message, Opcode, ProtocolError, SessionKey};

/// Encodes a message into one wire frame.
///
/// # Errors
/// [`ProtocolError::StringTooLong`] if a string field doesn't fit in its
/// 2-byte length prefix. Nothing else can fail.
pub fn encode(msg: &Message) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u8(msg.opcode_byte());

    match msg {
        Message::LoginRequest {
            version,
            name,
            password,
        } => {
            buf.put_u8(*version);
            put_string(&mut buf, "name", name)?;
            put_string(&mut buf, "password", password)?;
        }
        Message::LoginSuccess { reconnect_key }
        | Message::RelocateSuccess { reconnect_key } => {
            buf.put_slice(reconnect_key.as_bytes());
        }
        Message::LoginFailure { reason } | Message::RelocateFailure { reason } => {
            put_string(&mut buf, "reason", reason)?;
        }
        Message::LoginRedirect { host, port } => {
            put_string(&mut buf, "host", host)?;
            buf.put_i32(*port);
        }
        Message::RelocateNotification {
            host,
            port,
            relocation_key,
        } => {
            put_string(&mut buf, "host", host)?;
            buf.put_i32(*port);
            buf.put_slice(relocation_key.as_bytes());
        }
        Message::RelocateRequest {
            version,
            relocation_key,
        } => {
            buf.put_u8(*version);
            buf.put_slice(relocation_key.as_bytes());
        }
        Message::LogoutRequest | Message::LogoutSuccess => {}
        Message::SessionMessage { payload } | Message::Unknown { payload, .. } => {
            buf.put_slice(payload);
        }
    }

    Ok(buf.freeze())
}

/// Decodes one wire frame.
///
/// An opcode outside the protocol set is NOT an error: it comes back as
/// [`Message::Unknown`] with the rest of the frame untouched.
///
/// # Errors
/// Any [`ProtocolError`]: empty frame, truncated field, invalid UTF-8, or
/// trailing garbage after a fixed-layout message. The caller must treat
/// the connection as unusable.
pub fn decode(mut data: Bytes) -> Result<Message, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::Empty);
    }
    let byte = data.get_u8();
    let Some(opcode) = Opcode::from_u8(byte) else {
        return Ok(Message::Unknown {
            opcode: byte,
            payload: data,
        });
    };

    let msg = match opcode {
        Opcode::LoginRequest => Message::LoginRequest {
            version: get_u8(&mut data, "version")?,
            name: get_string(&mut data, "name")?,
            password: get_string(&mut data, "password")?,
        },
        Opcode::LoginSuccess => Message::LoginSuccess {
            reconnect_key: SessionKey::from(rest(&mut data)),
        },
        Opcode::LoginFailure => Message::LoginFailure {
            reason: get_string(&mut data, "reason")?,
        },
        Opcode::LoginRedirect => Message::LoginRedirect {
            host: get_string(&mut data, "host")?,
            port: get_i32(&mut data, "port")?,
        },
        Opcode::RelocateNotification => Message::RelocateNotification {
            host: get_string(&mut data, "host")?,
            port: get_i32(&mut data, "port")?,
            relocation_key: SessionKey::from(rest(&mut data)),
        },
        Opcode::RelocateRequest => Message::RelocateRequest {
            version: get_u8(&mut data, "version")?,
            relocation_key: SessionKey::from(rest(&mut data)),
        },
        Opcode::RelocateSuccess => Message::RelocateSuccess {
            reconnect_key: SessionKey::from(rest(&mut data)),
        },
        Opcode::RelocateFailure => Message::RelocateFailure {
            reason: get_string(&mut data, "reason")?,
        },
        Opcode::SessionMessage => Message::SessionMessage {
            payload: rest(&mut data),
        },
        Opcode::LogoutRequest => Message::LogoutRequest,
        Opcode::LogoutSuccess => Message::LogoutSuccess,
    };

    if data.has_remaining() {
        return Err(ProtocolError::TrailingBytes {
            opcode,
            extra: data.remaining(),
        });
    }
    Ok(msg)
}

fn put_string(
    buf: &mut BytesMut,
    field: &'static str,
    value: &str,
) -> Result<(), ProtocolError> {
    let len = u16::try_from(value.len()).map_err(|_| {
        ProtocolError::StringTooLong {
            field,
            len: value.len(),
        }
    })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn need(data: &Bytes, field: &'static str, needed: usize) -> Result<(), ProtocolError> {
    if data.remaining() < needed {
        return Err(ProtocolError::Truncated {
            field,
            needed,
            remaining: data.remaining(),
        });
    }
    Ok(())
}

fn get_u8(data: &mut Bytes, field: &'static str) -> Result<u8, ProtocolError> {
    need(data, field, 1)?;
    Ok(data.get_u8())
}

fn get_i32(data: &mut Bytes, field: &'static str) -> Result<i32, ProtocolError> {
    need(data, field, 4)?;
    Ok(data.get_i32())
}

fn get_string(data: &mut Bytes, field: &'static str) -> Result<String, ProtocolError> {
    need(data, field, 2)?;
    let len = usize::from(data.get_u16());
    need(data, field, len)?;
    let raw = data.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8 { field })
}

/// Takes everything that's left.
fn rest(data: &mut Bytes) -> Bytes {
    std::mem::take(data)
}
