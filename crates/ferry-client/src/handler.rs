//! The application-side extension point of a client session.
//!
//! The state machine handles the closed set of session opcodes itself.
//! Everything it does not interpret goes to a [`SessionHandler`]:
//! SESSION_MESSAGE payloads, messages with opcodes outside the protocol
//! set, and notifications that the reconnect key changed.

use bytes::Bytes;
use ferry_protocol::SessionKey;

/// Receives what the session state machine doesn't interpret.
///
/// Methods are called from the session's event task, in the order the
/// messages arrived, and never while the session's state is locked. They
/// should return quickly; hand heavy work to another task (a channel
/// sender is the usual implementation).
///
/// Every method has a no-op default, and `()` is the handler that ignores
/// everything.
pub trait SessionHandler: Send + Sync + 'static {
    /// A SESSION_MESSAGE arrived. The post-login heartbeat the node may
    /// echo shows up here as an empty payload.
    fn session_message(&self, _payload: Bytes) {}

    /// A message with an opcode outside the protocol set arrived.
    /// `payload` is everything after the opcode byte, untouched.
    fn unknown_message(&self, _opcode: u8, _payload: Bytes) {}

    /// A LOGIN_SUCCESS or RELOCATE_SUCCESS installed a new reconnect key.
    fn reconnect_key_changed(&self, _key: &SessionKey) {}

    /// The connection went away without the session asking for it.
    fn disconnected(&self) {}
}

impl SessionHandler for () {}
