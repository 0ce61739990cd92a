//! Server lifecycle states and the shutdown signal.
//!
//! ```text
//! Created ──start──► Initialized ──► Running ──stop──► Stopped
//!    └─────────────────────stop──────────────────────────┘
//! ```
//!
//! `Initialized` is only observable from inside `start`: the socket is bound
//! but the dispatch loop is not yet scheduled. There is no way back out of
//! `Stopped`.

use std::fmt;

use tokio::sync::watch;

/// Lifecycle state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Configured, registry open for registration
    Created,
    /// Socket bound, tasks not yet running
    Initialized,
    /// Accepting and dispatching
    Running,
    /// Shut down; terminal
    Stopped,
}

impl ServerState {
    /// Whether `start` is allowed.
    pub fn can_start(self) -> bool {
        self == Self::Created
    }

    /// Whether the registry and hooks may still be changed.
    pub fn is_configurable(self) -> bool {
        self == Self::Created
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Initialized => write!(f, "initialized"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Resolve once shutdown is signalled or the signalling side is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender means the server is gone, which is also shutdown.
    let _ = shutdown.wait_for(|stop| *stop).await;
}
