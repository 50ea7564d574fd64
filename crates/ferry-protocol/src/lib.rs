//! Wire protocol for Ferry.
//!
//! This crate defines the "language" that clients and nodes speak:
//!
//! - **Types** ([`Message`], [`Opcode`], [`SessionKey`]): the messages
//!   that travel on the wire.
//! - **Codec** ([`encode`], [`decode`]): how those messages are converted
//!   to and from bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong during encoding or
//!   decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw frames) and the session
//! state machine. It knows nothing about connections: it only turns one
//! frame into one [`Message`] and back.
//!
//! ```text
//! Transport (frames) → Protocol (Message) → Client / Node (session state)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod codec;
mod error;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::{decode, encode};
pub use error::ProtocolError;
pub use types::{Message, Opcode, PROTOCOL_VERSION, SessionKey};
