//! Client side of the Ferry session protocol.
//!
//! A [`ClientSession`] is one logical session that lives on exactly one
//! node at a time:
//!
//! 1. **Connect** to any node ([`ClientSession::connect`]).
//! 2. **Log in** ([`ClientSession::login`]). The node may redirect us to
//!    another node first; the session follows transparently, up to a hop
//!    limit.
//! 3. **Relocate** when the cluster says so
//!    ([`ClientSession::relocate`]): leave the current node, present the
//!    single-use relocation key to the new one, get a fresh reconnect key.
//! 4. **Log out** ([`ClientSession::logout`]).
//!
//! Session payloads and application opcodes are not interpreted here;
//! they go to your [`SessionHandler`].
//!
//! # How it fits in the stack
//!
//! ```text
//! Application (above)  ← SessionHandler callbacks, send_message
//!     ↕
//! Client session (this crate)  ← state machine, deadlines, key handling
//!     ↕
//! Protocol + Transport (below)  ← Message codec, connection events
//! ```

mod config;
mod error;
mod handler;
mod session;
mod state;

pub use config::ClientConfig;
pub use error::ClientError;
pub use handler::SessionHandler;
pub use session::ClientSession;
pub use state::{KeyChoice, LoginOutcome, RelocationNotice, SessionState};
