//! Client session configuration.

use std::time::Duration;

use ferry_protocol::PROTOCOL_VERSION;
use serde::{Deserialize, Serialize};

/// Timeouts and limits for a [`ClientSession`](crate::ClientSession).
///
/// Every timeout is a hard deadline measured from the start of the
/// operation it bounds, not from the last message received.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long `connect` waits for the transport to come up.
    pub connect_timeout_ms: u64,

    /// How long `login`, `relocate`, `logout` and
    /// `wait_for_relocation_notification` wait for the node.
    pub request_timeout_ms: u64,

    /// How many LOGIN_REDIRECT hops `login` follows before giving up.
    /// `0` means a redirect is reported as a failure straight away.
    pub max_redirects: u32,

    /// Version byte sent in LOGIN_REQUEST and RELOCATE_REQUEST.
    pub protocol_version: u8,
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 5_000,
            max_redirects: 3,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}
