//! Error types for the Switchyard core.
//!
//! Errors are split by blast radius: transport and protocol errors are
//! scoped to one connection, dispatch errors to one message, registration
//! errors to one handler at load time. None of them is fatal to the server.

use std::{fmt, io};

use switchyard_proto::ProtocolError;
use thiserror::Error;

/// Errors from the byte channel underneath a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection was closed locally
    #[error("connection closed")]
    Closed,

    /// Peer went away before delivering the requested bytes
    #[error("peer disconnected after {received} of {expected} bytes")]
    PeerDisconnected {
        /// Bytes requested
        expected: usize,
        /// Bytes received before end of stream
        received: usize,
    },

    /// Underlying socket error
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors from reading or writing one frame on a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The channel failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The bytes did not form a valid frame
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors from running registered handlers on one envelope.
///
/// The connection stays pooled after either of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Deserializer rejected the payload or panicked
    #[error("failed to deserialize {type_name} payload: {reason}")]
    Deserialization {
        /// Envelope type
        type_name: String,
        /// Deserializer error message
        reason: String,
    },

    /// Action returned an error or panicked
    #[error("action for {type_name} failed: {reason}")]
    Action {
        /// Envelope type
        type_name: String,
        /// Action error message
        reason: String,
    },
}

/// Which half of a registry entry a registration targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Payload deserializer
    Deserializer,
    /// Action run on the deserialized value
    Action,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deserializer => write!(f, "deserializer"),
            Self::Action => write!(f, "action"),
        }
    }
}

/// Errors from registering handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// A handler of this kind already exists for the type; the existing one
    /// is kept
    #[error("{kind} for {type_name} is already registered")]
    Conflict {
        /// Type name that was registered twice
        type_name: String,
        /// Kind of handler
        kind: HandlerKind,
    },

    /// Type names must be non-empty to be routable
    #[error("cannot register {kind} for an empty type name")]
    EmptyTypeName {
        /// Kind of handler
        kind: HandlerKind,
    },
}
