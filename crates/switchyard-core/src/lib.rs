//! Switchyard core.
//!
//! Runtime-agnostic pieces of the dispatch server: the [`Connection`]
//! abstraction over a [`Transport`], the type-name [`Registry`], and the
//! [`ConnectionPool`] that tracks idle time and evicts stale connections.
//!
//! Nothing here binds sockets or spawns long-lived tasks. The server crate
//! owns the accept loops and the dispatch loop; this crate gives them
//! something to drive.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
pub mod error;
pub mod pool;
pub mod registry;
pub mod transport;

pub use connection::Connection;
pub use error::{DispatchError, FrameError, HandlerKind, RegistrationError, TransportError};
pub use pool::ConnectionPool;
pub use registry::{DispatchOutcome, Registry};
pub use switchyard_proto::{Envelope, ProtocolError};
pub use transport::{StreamTransport, Transport};
