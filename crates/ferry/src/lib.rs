//! # Ferry
//!
//! Relocatable client sessions for clustered game backends.
//!
//! A player's session lives on one node at a time. Nodes can redirect a
//! login to another node, and can later move a live session elsewhere by
//! handing the client a single-use relocation key. Ferry provides both
//! sides of that conversation:
//!
//! - [`ClientSession`](ferry_client::ClientSession): the client state
//!   machine (connect, login, relocate, logout).
//! - [`Node`]: a server node that authenticates, redirects, accepts
//!   relocated sessions, and forwards session messages to your code.
//!
//! Nodes started in the same process share a [`Cluster`] directory.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ferry::prelude::*;
//!
//! struct OpenDoor;
//!
//! impl Authenticator for OpenDoor {
//!     async fn authenticate(&self, _name: &str, _password: &str) -> Result<(), SessionError> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), FerryError> {
//! let node = NodeBuilder::new().bind("127.0.0.1:9000").build(OpenDoor).await?;
//! tokio::spawn(node.run());
//!
//! let session = ClientSession::websocket(ClientConfig::default());
//! session.connect(Address::new("127.0.0.1", 9000)).await?;
//! session.login("alice", "secret").await?;
//! session.send_message(&b"hello"[..]).await?;
//! session.logout().await?;
//! # Ok(())
//! # }
//! ```

mod cluster;
mod error;
mod handler;
mod node;

pub use cluster::{Cluster, SessionRecord};
pub use error::FerryError;
pub use node::{InboxMessage, Node, NodeBuilder, NodeConfig, NodeHandle};

pub use ferry_client as client;
pub use ferry_protocol as protocol;
pub use ferry_session as session;
pub use ferry_transport as transport;

/// Convenience re-exports for the common case.
pub mod prelude {
    pub use crate::{Cluster, FerryError, InboxMessage, Node, NodeBuilder, NodeConfig, NodeHandle};
    pub use ferry_client::{
        ClientConfig, ClientError, ClientSession, KeyChoice, LoginOutcome, RelocationNotice,
        SessionHandler, SessionState,
    };
    pub use ferry_protocol::{Message, Opcode, PROTOCOL_VERSION, SessionKey};
    pub use ferry_session::{Authenticator, KeyConfig, SessionError, SessionId};
    pub use ferry_transport::Address;
}
