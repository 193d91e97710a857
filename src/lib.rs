//! Client for the BaseX server protocol.
//!
//! Talks the line-oriented binary protocol directly over TCP: terminated,
//! escape-safe frames, MD5 challenge-response login, and the strictly
//! sequential command/payload/info/status conversation. Sessions are
//! pooled per database name so the expensive connect-plus-login round
//! trip is paid once and amortized across many short command executions.
//!
//! Architecture:
//! - `protocol`: wire framing and login digest
//! - `session`: async session and connection configuration
//! - `pool`: async session pool and scoped database-bound sessions
//! - `blocking`: blocking mirror of the session and pool surface
//! - `commands`: command-string builders and `list` reply parsing
//! - `error`: error taxonomy
//!
//! Command text is opaque to this crate; callers assign meaning to
//! `list`, `open <db>`, `xquery <text>` and friends.

pub mod blocking;
mod commands;
mod error;
mod pool;
mod protocol;
mod session;


pub use commands::{bindings_string, escape_quotes, Database};
pub use error::{ClientError, ClientResult};
pub use pool::{DatabaseSession, EventHandler, PoolEvent, SessionPool};
pub use protocol::{encode_payload, ESCAPE, TERMINATOR};
pub use session::{Session, SessionConfig, DEFAULT_PORT};
