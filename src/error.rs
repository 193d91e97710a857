//! Error types for the client.

use std::io;

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by sessions and pools.
///
/// Socket-level failures are fatal to the session they occurred on; a
/// `Command` error leaves the connection usable for further commands.
#[derive(Error, Debug)]
pub enum ClientError {
    /// I/O error during communication.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The server closed the stream in the middle of a message.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server rejected the login digest.
    #[error("access denied")]
    AccessDenied,

    /// The server answered a command with a nonzero status byte. The
    /// message is the server's info string, verbatim.
    #[error("{0}")]
    Command(String),

    /// A socket operation exceeded the configured deadline.
    #[error("operation timed out")]
    Timeout,

    /// The pool was shut down.
    #[error("session pool is closed")]
    PoolClosed,

    /// Connection URL could not be parsed.
    #[error("invalid connection url: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    /// Fold socket-timeout error kinds into the dedicated variant.
    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ClientError::Timeout,
            _ => ClientError::Io(err),
        }
    }
}
