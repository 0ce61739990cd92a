//! Server error types.

use std::fmt;

use crate::lifecycle::ServerState;

/// Errors from the server lifecycle API.
///
/// Per-connection and per-message failures never surface here; they are
/// logged and contained by the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Configuration error (empty host, zero tick, etc.).
    ///
    /// Fatal for `start`. Fix configuration and create a new server.
    Config(String),

    /// Transport/network error (bind failure, address in use, etc.).
    Transport(String),

    /// Operation not allowed in the current lifecycle state.
    InvalidState {
        /// State the server was in
        state: ServerState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Internal error (unexpected task failure, logic bug).
    ///
    /// Should never happen in correct implementation.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::InvalidState { state, operation } => {
                write!(f, "cannot {operation} a server in state {state}")
            },
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
