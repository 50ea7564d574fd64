//! Session identity and key configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Cluster-wide identity of one logged-in session.
///
/// Assigned by the node on successful login and kept across relocations;
/// the client never sees it (it only ever holds keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Shortest key the [`KeyManager`](crate::KeyManager) will issue. Below
/// this a busy node could run out of distinct keys.
pub const MIN_KEY_LEN: usize = 8;

/// How keys are generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Number of random bytes per key. 16 bytes = 128 bits, which makes
    /// guessing a live key infeasible. Values below [`MIN_KEY_LEN`] are
    /// raised to it.
    pub key_len: usize,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self { key_len: 16 }
    }
}
