//! Session identity and key management for Ferry.
//!
//! This crate owns the security-sensitive half of the session layer:
//!
//! 1. **Authentication**: checking a login's name and password
//!    ([`Authenticator`] trait).
//! 2. **Keys**: issuing, validating and consuming the opaque reconnect and
//!    relocation keys that let a session move between nodes
//!    ([`KeyManager`]).
//!
//! # How it fits in the stack
//!
//! ```text
//! Node / Cluster (above)  ← issues keys on login, redeems them on relocation
//!     ↕
//! Session Layer (this crate)  ← who is logged in, which key is live
//!     ↕
//! Protocol Layer (below)  ← provides SessionKey
//! ```

mod auth;
mod error;
mod manager;
mod session;

pub use auth::Authenticator;
pub use error::SessionError;
pub use manager::KeyManager;
pub use session::{KeyConfig, MIN_KEY_LEN, SessionId};
