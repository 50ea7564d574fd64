//! `Node` builder, accept loop, and control handle.
//!
//! A node is one server process of the cluster. It accepts client
//! connections, logs sessions in (or redirects them elsewhere), accepts
//! sessions relocated from other nodes, and lets the application push
//! messages or relocation orders to the sessions it hosts through a
//! [`NodeHandle`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ferry_protocol::{Message, PROTOCOL_VERSION, encode};
use ferry_session::{Authenticator, SessionError, SessionId};
use ferry_transport::{Address, Transport, TransportError, WebSocketTransport};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};

use crate::handler::handle_connection;
use crate::{Cluster, FerryError};

/// Per-node timeouts and protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// How long a new connection may take to send its LOGIN_REQUEST or
    /// RELOCATE_REQUEST.
    pub handshake_timeout_ms: u64,
    /// An established session that sends nothing for this long is
    /// disconnected.
    pub idle_timeout_ms: u64,
    /// How long a relocation key stays redeemable. When it expires the
    /// relocation is called off, and a session whose connection is
    /// already gone is removed.
    pub relocation_timeout_ms: u64,
    /// Requests carrying any other version byte are refused.
    pub protocol_version: u8,
}

impl NodeConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn relocation_timeout(&self) -> Duration {
        Duration::from_millis(self.relocation_timeout_ms)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 5_000,
            idle_timeout_ms: 60_000,
            relocation_timeout_ms: 30_000,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

/// A SESSION_MESSAGE received by a node, as delivered to its inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxMessage {
    pub session: SessionId,
    pub name: String,
    pub payload: Bytes,
}

/// Instructions from a [`NodeHandle`] to one connection task.
#[derive(Debug)]
pub(crate) enum Command {
    Send(Bytes),
    Close,
}

/// State shared by the accept loop, every connection task, and every
/// [`NodeHandle`].
pub(crate) struct NodeShared {
    pub(crate) address: Address,
    pub(crate) config: NodeConfig,
    pub(crate) redirect_to: Option<Address>,
    pub(crate) cluster: Arc<Cluster>,
    pub(crate) inbox: Option<mpsc::UnboundedSender<InboxMessage>>,
    /// Sessions currently connected to THIS node.
    pub(crate) connections: Mutex<HashMap<SessionId, mpsc::UnboundedSender<Command>>>,
}

pub(crate) struct NodeState<A: Authenticator> {
    pub(crate) shared: Arc<NodeShared>,
    pub(crate) auth: A,
}

/// Builder for configuring and starting a [`Node`].
///
/// # Example
///
/// ```rust,ignore
/// use ferry::prelude::*;
///
/// let cluster = Arc::new(Cluster::default());
/// let node = NodeBuilder::new()
///     .bind("0.0.0.0:9000")
///     .cluster(Arc::clone(&cluster))
///     .build(my_auth)
///     .await?;
/// node.run().await
/// ```
pub struct NodeBuilder {
    bind_addr: String,
    config: NodeConfig,
    advertise: Option<Address>,
    redirect_to: Option<Address>,
    cluster: Option<Arc<Cluster>>,
    inbox: Option<mpsc::UnboundedSender<InboxMessage>>,
}

impl NodeBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
            config: NodeConfig::default(),
            advertise: None,
            redirect_to: None,
            cluster: None,
            inbox: None,
        }
    }

    /// Sets the address to listen on.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address other nodes name in RELOCATE_NOTIFICATION and
    /// LOGIN_REDIRECT. Defaults to the bound address.
    pub fn advertise(mut self, address: Address) -> Self {
        self.advertise = Some(address);
        self
    }

    /// Makes this node a front door: every login is redirected to
    /// `target` instead of being authenticated here.
    pub fn redirect_to(mut self, target: Address) -> Self {
        self.redirect_to = Some(target);
        self
    }

    /// Joins an existing cluster. Without this the node gets a cluster of
    /// its own.
    pub fn cluster(mut self, cluster: Arc<Cluster>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Delivers every non-empty SESSION_MESSAGE to `inbox`.
    pub fn inbox(mut self, inbox: mpsc::UnboundedSender<InboxMessage>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// Binds the listener and builds the node with the given
    /// authenticator.
    pub async fn build<A: Authenticator>(self, auth: A) -> Result<Node<A>, FerryError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let address = match self.advertise {
            Some(address) => address,
            None => Address::from(
                transport
                    .local_addr()
                    .map_err(TransportError::AcceptFailed)?,
            ),
        };

        let shared = Arc::new(NodeShared {
            address,
            config: self.config,
            redirect_to: self.redirect_to,
            cluster: self.cluster.unwrap_or_default(),
            inbox: self.inbox,
            connections: Mutex::new(HashMap::new()),
        });

        Ok(Node {
            transport,
            state: Arc::new(NodeState { shared, auth }),
        })
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One cluster node.
///
/// Call [`run()`](Self::run) to start accepting connections; grab a
/// [`handle()`](Self::handle) first if you want to steer sessions.
pub struct Node<A: Authenticator> {
    transport: WebSocketTransport,
    state: Arc<NodeState<A>>,
}

impl<A: Authenticator> Node<A> {
    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The address this node advertises to clients.
    pub fn address(&self) -> &Address {
        &self.state.shared.address
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            shared: Arc::clone(&self.state.shared),
        }
    }

    /// Runs the accept loop, spawning one task per connection. Runs until
    /// the task is aborted or the process ends.
    pub async fn run(mut self) -> Result<(), FerryError> {
        tracing::info!(address = %self.state.shared.address, "node running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

/// Cheap, cloneable control handle for a running [`Node`].
///
/// Every operation targets a session connected to THIS node and fails
/// with [`SessionError::NotFound`] otherwise.
#[derive(Clone)]
pub struct NodeHandle {
    shared: Arc<NodeShared>,
}

impl NodeHandle {
    pub fn address(&self) -> &Address {
        &self.shared.address
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.shared.cluster
    }

    /// Sessions currently connected here, in id order.
    pub async fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.shared.connections.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// The session connected here that logged in as `name`.
    pub async fn find_session(&self, name: &str) -> Option<SessionId> {
        for id in self.sessions().await {
            if let Some(record) = self.shared.cluster.session(id).await {
                if record.name == name {
                    return Some(id);
                }
            }
        }
        None
    }

    /// Tells session `id` to move to `target`: issues a relocation key
    /// for it and sends RELOCATE_NOTIFICATION.
    ///
    /// The key expires after [`NodeConfig::relocation_timeout`]. A session
    /// that has neither arrived at `target` nor stayed connected here by
    /// then is removed from the cluster.
    pub async fn relocate(&self, id: SessionId, target: Address) -> Result<(), FerryError> {
        let key = self
            .shared
            .cluster
            .begin_relocation(id, &self.shared.address, target.clone())
            .await?;
        let frame = encode(&Message::RelocateNotification {
            host: target.host.clone(),
            port: target.wire_port(),
            relocation_key: key.clone(),
        })?;
        self.command(id, Command::Send(frame)).await?;

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(shared.config.relocation_timeout()).await;
            // Held across the cluster call so a connection that closes
            // meanwhile releases the session after the expiry, not before.
            let connections = shared.connections.lock().await;
            let connected = connections.contains_key(&id);
            shared
                .cluster
                .expire_relocation(id, &shared.address, &key, connected)
                .await;
        });
        Ok(())
    }

    /// Sends a SESSION_MESSAGE to session `id`.
    pub async fn send_message(&self, id: SessionId, payload: impl Into<Bytes>) -> Result<(), FerryError> {
        let frame = encode(&Message::SessionMessage {
            payload: payload.into(),
        })?;
        self.command(id, Command::Send(frame)).await
    }

    /// Sends `frame` to session `id` without looking at it.
    pub async fn send_raw(&self, id: SessionId, frame: impl Into<Bytes>) -> Result<(), FerryError> {
        self.command(id, Command::Send(frame.into())).await
    }

    /// Closes session `id`'s connection.
    pub async fn disconnect(&self, id: SessionId) -> Result<(), FerryError> {
        self.command(id, Command::Close).await
    }

    async fn command(&self, id: SessionId, command: Command) -> Result<(), FerryError> {
        let connections = self.shared.connections.lock().await;
        let tx = connections.get(&id).ok_or(SessionError::NotFound(id))?;
        tx.send(command).map_err(|_| SessionError::NotFound(id))?;
        Ok(())
    }
}
