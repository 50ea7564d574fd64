//! The key manager: one live key per session, each usable once.
//!
//! A node hands a client a key at two moments: on login/relocation
//! success (the reconnect key) and in a relocation notification (the
//! relocation key). Either way the rules are the same:
//!
//! - A session has at most one live key. Issuing a new one replaces the
//!   old one, which stops working immediately.
//! - Keys compare by exact bytes. The empty key is "no key" and never
//!   matches anything, even a session that currently has no key.
//! - A successful validation consumes the key. Presenting the same key a
//!   second time fails. This is what stops a captured relocation key from
//!   being replayed to pull the session onto a third node.
//!
//! # Concurrency note
//!
//! `KeyManager` is a plain pair of `HashMap`s and is NOT thread-safe by
//! itself. The owner (the node's `Cluster`) keeps it behind a mutex and
//! never holds that mutex across an await.

use std::collections::HashMap;

use ferry_protocol::SessionKey;
use rand::Rng;

use crate::{KeyConfig, MIN_KEY_LEN, SessionId};

/// Issues and validates single-use session keys.
///
/// ## Lifecycle of one key
///
/// ```text
/// issue(id) ──→ [live] ──→ validate(id, key) / redeem(key) ──→ [consumed]
///                  │
///                  ├──→ issue(id) again ──→ [replaced]
///                  └──→ invalidate(id)  ──→ [revoked]
/// ```
#[derive(Debug, Default)]
pub struct KeyManager {
    /// The live key of each session.
    by_session: HashMap<SessionId, SessionKey>,

    /// Reverse index so a node that only receives a key (RELOCATE_REQUEST
    /// carries no session id) can find its owner without a scan. Kept in
    /// sync with `by_session`.
    by_key: HashMap<SessionKey, SessionId>,

    config: KeyConfig,
}

impl KeyManager {
    /// Creates an empty key manager.
    pub fn new(config: KeyConfig) -> Self {
        Self {
            by_session: HashMap::new(),
            by_key: HashMap::new(),
            config,
        }
    }

    /// Issues a fresh key for `session`, replacing any key it had.
    ///
    /// The new key is random, non-empty, and different from every key
    /// currently live in this manager.
    pub fn issue(&mut self, session: SessionId) -> SessionKey {
        self.invalidate(session);

        let key = loop {
            let candidate = generate_key(self.config.key_len);
            if !self.by_key.contains_key(&candidate) {
                break candidate;
            }
        };

        self.by_key.insert(key.clone(), session);
        self.by_session.insert(session, key.clone());
        tracing::debug!(%session, "key issued");
        key
    }

    /// Checks `presented` against the live key of `session`.
    ///
    /// Returns `true` and CONSUMES the key on an exact match. Returns
    /// `false` (and leaves the live key alone) for an empty key, a wrong
    /// key, or a session without a live key.
    pub fn validate(&mut self, session: SessionId, presented: &SessionKey) -> bool {
        if presented.is_empty() {
            return false;
        }
        match self.by_session.get(&session) {
            Some(live) if live == presented => {
                self.invalidate(session);
                tracing::debug!(%session, "key validated and consumed");
                true
            }
            _ => false,
        }
    }

    /// Finds the session that owns `presented` and consumes the key.
    ///
    /// Same rules as [`validate`](Self::validate), for callers that only
    /// have the key.
    pub fn redeem(&mut self, presented: &SessionKey) -> Option<SessionId> {
        if presented.is_empty() {
            return None;
        }
        let session = self.by_key.remove(presented)?;
        self.by_session.remove(&session);
        tracing::debug!(%session, "key redeemed");
        Some(session)
    }

    /// Revokes the live key of `session`, if any. Returns whether there
    /// was one.
    pub fn invalidate(&mut self, session: SessionId) -> bool {
        match self.by_session.remove(&session) {
            Some(old) => {
                self.by_key.remove(&old);
                true
            }
            None => false,
        }
    }

    /// Returns `true` if `key` is the live key of `session`. Unlike
    /// [`validate`](Self::validate) this does not consume it.
    pub fn is_live(&self, session: SessionId, key: &SessionKey) -> bool {
        !key.is_empty() && self.by_session.get(&session) == Some(key)
    }

    /// Returns `true` if `session` currently has a live key.
    pub fn contains(&self, session: SessionId) -> bool {
        self.by_session.contains_key(&session)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.by_session.len()
    }

    /// Returns `true` if no keys are live.
    pub fn is_empty(&self) -> bool {
        self.by_session.is_empty()
    }
}

fn generate_key(len: usize) -> SessionKey {
    let mut bytes = vec![0u8; len.max(MIN_KEY_LEN)];
    rand::rng().fill(bytes.as_mut_slice());
    SessionKey::from(bytes)
}

// =========================================================================
// Tests
// =========================================================================
