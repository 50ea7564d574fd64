//! The cluster directory shared by every node in one process.
//!
//! A session's identity outlives any one connection: it starts on the
//! node that accepted the login and may move several times. The
//! [`Cluster`] is where that identity lives, together with the two key
//! managers that guard it:
//!
//! - **reconnect keys**, handed out in LOGIN_SUCCESS and RELOCATE_SUCCESS;
//! - **relocation keys**, handed out in RELOCATE_NOTIFICATION and
//!   redeemed exactly once by the target node.
//!
//! How nodes find each other and when a session should move are not
//! decided here; the directory only records the outcome.

use std::collections::HashMap;

use ferry_protocol::SessionKey;
use ferry_session::{KeyConfig, KeyManager, SessionError, SessionId};
use ferry_transport::Address;
use tokio::sync::Mutex;

/// What the cluster knows about one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// The name the session logged in with.
    pub name: String,
    /// The node currently hosting it.
    pub node: Address,
    /// Set between RELOCATE_NOTIFICATION and the relocation completing.
    pub relocating_to: Option<Address>,
}

struct Directory {
    next_id: u64,
    sessions: HashMap<SessionId, SessionRecord>,
    reconnect_keys: KeyManager,
    relocation_keys: KeyManager,
}

/// Shared session directory. Wrap it in an `Arc` and give the same one to
/// every [`NodeBuilder`](crate::NodeBuilder) that should accept the
/// others' relocations.
pub struct Cluster {
    directory: Mutex<Directory>,
}

impl Cluster {
    pub fn new(config: KeyConfig) -> Self {
        Self {
            directory: Mutex::new(Directory {
                next_id: 1,
                sessions: HashMap::new(),
                reconnect_keys: KeyManager::new(config.clone()),
                relocation_keys: KeyManager::new(config),
            }),
        }
    }

    /// Registers a freshly authenticated session on `node` and issues its
    /// first reconnect key.
    pub async fn admit(&self, name: &str, node: &Address) -> (SessionId, SessionKey) {
        let mut dir = self.directory.lock().await;
        let id = SessionId(dir.next_id);
        dir.next_id += 1;
        dir.sessions.insert(
            id,
            SessionRecord {
                name: name.to_string(),
                node: node.clone(),
                relocating_to: None,
            },
        );
        let key = dir.reconnect_keys.issue(id);
        tracing::info!(%id, session = %name, %node, "session admitted");
        (id, key)
    }

    /// Starts moving `id` from `from` to `to`: records the target and
    /// issues a relocation key. A second call replaces the first target
    /// and key.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] unless `id` is currently hosted on
    /// `from`.
    pub async fn begin_relocation(
        &self,
        id: SessionId,
        from: &Address,
        to: Address,
    ) -> Result<SessionKey, SessionError> {
        let mut dir = self.directory.lock().await;
        let dir = &mut *dir;
        let record = dir
            .sessions
            .get_mut(&id)
            .filter(|record| record.node == *from)
            .ok_or(SessionError::NotFound(id))?;
        tracing::info!(%id, %from, %to, "relocation started");
        record.relocating_to = Some(to);
        Ok(dir.relocation_keys.issue(id))
    }

    /// Redeems `key` on behalf of `node`. On success the session is hosted
    /// on `node` and gets a new reconnect key; the old one is revoked.
    ///
    /// The key is consumed even when the request is refused for naming
    /// the wrong node, so a captured key can't be tried twice.
    ///
    /// # Errors
    /// [`SessionError::InvalidKey`] for an empty, unknown, or already used
    /// key, or a key issued for a different target.
    pub async fn complete_relocation(
        &self,
        key: &SessionKey,
        node: &Address,
    ) -> Result<(SessionId, String, SessionKey), SessionError> {
        let mut dir = self.directory.lock().await;
        let dir = &mut *dir;
        let id = dir.relocation_keys.redeem(key).ok_or(SessionError::InvalidKey)?;
        let record = dir.sessions.get_mut(&id).ok_or(SessionError::NotFound(id))?;

        if record.relocating_to.as_ref() != Some(node) {
            tracing::warn!(%id, %node, expected = ?record.relocating_to, "relocation key presented to the wrong node");
            record.relocating_to = None;
            return Err(SessionError::InvalidKey);
        }

        record.node = node.clone();
        record.relocating_to = None;
        let name = record.name.clone();
        let reconnect_key = dir.reconnect_keys.issue(id);
        tracing::info!(%id, session = %name, %node, "relocation completed");
        Ok((id, name, reconnect_key))
    }

    /// Calls off the relocation that `from` started with `key`, if it is
    /// still pending, and removes the session when its connection to
    /// `from` is gone (`connected == false`).
    ///
    /// Does nothing if the session has since moved, been removed, or been
    /// given a newer relocation. Returns whether it was removed.
    pub async fn expire_relocation(
        &self,
        id: SessionId,
        from: &Address,
        key: &SessionKey,
        connected: bool,
    ) -> bool {
        let mut dir = self.directory.lock().await;
        let dir = &mut *dir;
        let Some(record) = dir.sessions.get_mut(&id).filter(|r| r.node == *from) else {
            return false;
        };

        if dir.relocation_keys.is_live(id, key) {
            dir.relocation_keys.invalidate(id);
            tracing::info!(%id, %from, to = ?record.relocating_to, "relocation expired");
            record.relocating_to = None;
        } else if record.relocating_to.is_some() {
            return false;
        }

        if connected {
            return false;
        }
        dir.reconnect_keys.invalidate(id);
        dir.relocation_keys.invalidate(id);
        dir.sessions.remove(&id);
        tracing::debug!(%id, %from, "abandoned session removed");
        true
    }

    /// Ends a session: removes it and revokes both of its keys.
    pub async fn remove(&self, id: SessionId) -> Option<SessionRecord> {
        let mut dir = self.directory.lock().await;
        dir.reconnect_keys.invalidate(id);
        dir.relocation_keys.invalidate(id);
        dir.sessions.remove(&id)
    }

    /// Called when `node` loses the connection of `id` without a logout.
    ///
    /// The session is removed only if `node` still hosts it and it isn't
    /// on its way somewhere else; a session that is mid-relocation (or
    /// already moved) is left alone. Returns whether it was removed.
    pub async fn release(&self, id: SessionId, node: &Address) -> bool {
        let mut dir = self.directory.lock().await;
        let owned = dir
            .sessions
            .get(&id)
            .is_some_and(|r| r.node == *node && r.relocating_to.is_none());
        if owned {
            dir.reconnect_keys.invalidate(id);
            dir.relocation_keys.invalidate(id);
            dir.sessions.remove(&id);
            tracing::debug!(%id, %node, "session released");
        }
        owned
    }

    pub async fn session(&self, id: SessionId) -> Option<SessionRecord> {
        self.directory.lock().await.sessions.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.directory.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.directory.lock().await.sessions.is_empty()
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new(KeyConfig::default())
    }
}
