//! Switchyard dispatch server.
//!
//! Accepts stream (TCP) or datagram (UDP) connections, reads length-prefixed
//! envelopes off each one, and routes every envelope to the deserializer and
//! action registered for its type name.
//!
//! # Architecture
//!
//! ```text
//!  accept tasks / datagram router ──► admission queue ──► dispatch loop
//!                                                          │  owns pool
//!                                                          │  idle tick
//!                                                          └► reader task per
//!                                                             connection ──► Registry
//! ```
//!
//! # Components
//!
//! - [`Server`]: lifecycle (`Created → Initialized → Running → Stopped`)
//! - [`ServerConfig`]: host, port, timeouts and limits
//! - [`DatagramTransport`]: one UDP endpoint on a shared socket
//! - [`demo`]: example handlers used by the binary
//!
//! # Example
//!
//! ```no_run
//! use std::{convert::Infallible, sync::Arc};
//!
//! use switchyard_server::{Connection, Registry, Server, ServerConfig, TransportKind};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = Registry::new();
//! registry.register_deserializer("Ping", |_: &[u8]| Ok::<(), Infallible>(()))?;
//! registry.register_action("Ping", |(): (), conn: Arc<Connection>| async move {
//!     conn.send(b"ack").await
//! })?;
//!
//! let mut server = Server::new(TransportKind::Stream, ServerConfig::default(), registry);
//! server.start().await?;
//! // ...
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod accept;
pub mod config;
pub mod demo;
mod dispatcher;
mod error;
mod lifecycle;
mod transport;

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

pub use config::ServerConfig;
pub use error::ServerError;
pub use lifecycle::ServerState;
pub use switchyard_core::{
    Connection, DispatchError, DispatchOutcome, Envelope, FrameError, ProtocolError,
    RegistrationError, Registry, Transport, TransportError,
};
use tokio::{
    net::{TcpListener, UdpSocket},
    sync::{mpsc, watch},
    task::JoinSet,
};
pub use transport::{DatagramInbox, DatagramTransport, TcpTransport, tcp_transport};

use crate::{
    accept::{ConnectionIds, Producer},
    dispatcher::{DispatchSettings, Dispatcher},
};

/// Callback run by the dispatch loop when a connection enters the pool.
pub type ConnectedHook = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;

/// How the server produces connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// TCP listener; one connection per accepted stream
    Stream,
    /// UDP socket; one connection per remote endpoint
    Datagram,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Datagram => write!(f, "datagram"),
        }
    }
}

/// Background work owned by a started server.
struct Runtime {
    /// Flipped to `true` on stop
    shutdown: watch::Sender<bool>,
    /// Accept tasks or datagram router, plus the dispatch loop
    tasks: JoinSet<()>,
}

/// Typed-message dispatch server.
///
/// Register handlers through [`Server::registry_mut`] before
/// [`Server::start`]; the registry is frozen once the server runs. Dropping
/// a running server aborts its tasks, which closes every connection; call
/// [`Server::stop`] for an orderly shutdown.
pub struct Server {
    kind: TransportKind,
    config: ServerConfig,
    state: ServerState,
    /// Present until `start` freezes it
    registry: Option<Registry>,
    on_connected: Option<ConnectedHook>,
    local_addr: Option<SocketAddr>,
    connection_count: Arc<AtomicUsize>,
    runtime: Option<Runtime>,
}

impl Server {
    /// Create a server in the `Created` state.
    pub fn new(kind: TransportKind, config: ServerConfig, registry: Registry) -> Self {
        Self {
            kind,
            config,
            state: ServerState::Created,
            registry: Some(registry),
            on_connected: None,
            local_addr: None,
            connection_count: Arc::new(AtomicUsize::new(0)),
            runtime: None,
        }
    }

    /// Transport variant.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Configuration the server was created with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bound address. `None` until started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Connections currently in the pool.
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Acquire)
    }

    /// Registry for loading handlers.
    ///
    /// # Errors
    ///
    /// `ServerError::InvalidState` once the server has started.
    pub fn registry_mut(&mut self) -> Result<&mut Registry, ServerError> {
        let state = self.state;
        match self.registry.as_mut() {
            Some(registry) if state.is_configurable() => Ok(registry),
            _ => Err(ServerError::InvalidState { state, operation: "modify the registry of" }),
        }
    }

    /// Run `hook` for each connection as it is admitted to the pool.
    ///
    /// The hook runs on the dispatch loop; keep it short. A panic in the hook
    /// is logged and the connection is admitted anyway.
    ///
    /// # Errors
    ///
    /// `ServerError::InvalidState` once the server has started.
    pub fn on_connected<F>(&mut self, hook: F) -> Result<(), ServerError>
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        if !self.state.is_configurable() {
            return Err(ServerError::InvalidState {
                state: self.state,
                operation: "set the connect hook of",
            });
        }
        self.on_connected = Some(Arc::new(hook));
        Ok(())
    }

    /// Bind the socket and start accepting and dispatching.
    ///
    /// # Errors
    ///
    /// - `ServerError::InvalidState` unless the server is `Created`
    /// - `ServerError::Config` if the configuration is invalid
    /// - `ServerError::Transport` if the socket cannot be bound
    pub async fn start(&mut self) -> Result<(), ServerError> {
        if !self.state.can_start() {
            return Err(ServerError::InvalidState { state: self.state, operation: "start" });
        }
        self.config.validate()?;

        let address = self.config.bind_address();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (admissions, admissions_rx) = mpsc::unbounded_channel();
        let producer =
            Producer { admissions, ids: Arc::new(ConnectionIds::default()), shutdown: shutdown_rx };
        let mut tasks = JoinSet::new();

        match self.kind {
            TransportKind::Stream => {
                let listener = TcpListener::bind(&address).await.map_err(|e| {
                    ServerError::Transport(format!("failed to bind {address}: {e}"))
                })?;
                self.local_addr = Some(listener.local_addr()?);
                self.state = ServerState::Initialized;

                let listener = Arc::new(listener);
                accept::spawn_acceptors(
                    &mut tasks,
                    &listener,
                    self.config.accept_pool_size,
                    &producer,
                );
            },
            TransportKind::Datagram => {
                let socket = UdpSocket::bind(&address).await.map_err(|e| {
                    ServerError::Transport(format!("failed to bind {address}: {e}"))
                })?;
                self.local_addr = Some(socket.local_addr()?);
                self.state = ServerState::Initialized;

                tasks.spawn(accept::route_datagrams(Arc::new(socket), producer.clone()));
            },
        }

        let registry = Arc::new(self.registry.take().unwrap_or_default());
        let settings = DispatchSettings {
            tick_interval: self.config.tick_interval,
            timeout_threshold: self.config.timeout_threshold,
            max_envelope_size: self.config.max_envelope_size,
        };
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            settings,
            admissions_rx,
            producer.shutdown.clone(),
            self.on_connected.take(),
            Arc::clone(&self.connection_count),
        );
        drop(producer);
        tasks.spawn(dispatcher.run());

        self.runtime = Some(Runtime { shutdown, tasks });
        self.state = ServerState::Running;

        tracing::info!(
            "{} server listening on {} with {} message types",
            self.kind,
            address,
            registry.len()
        );
        if let Some(addr) = self.local_addr {
            tracing::debug!("Bound to {}", addr);
        }

        Ok(())
    }

    /// Stop accepting, close every connection, and release the socket.
    ///
    /// Waits up to `shutdown_grace` for background tasks, then aborts the
    /// rest. Stopping a stopped server does nothing; stopping a server that
    /// never started moves it straight to `Stopped`.
    ///
    /// # Errors
    ///
    /// `ServerError::Internal` if a background task panicked.
    pub async fn stop(&mut self) -> Result<(), ServerError> {
        if self.state == ServerState::Stopped {
            return Ok(());
        }

        let previous = self.state;
        self.state = ServerState::Stopped;
        self.registry = None;
        self.on_connected = None;

        let Some(mut runtime) = self.runtime.take() else {
            tracing::debug!("Server stopped from state {}", previous);
            return Ok(());
        };

        tracing::info!("{} server stopping", self.kind);
        runtime.shutdown.send_replace(true);

        let mut panicked = 0usize;
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(result) = runtime.tasks.join_next().await {
                if matches!(&result, Err(e) if e.is_panic()) {
                    panicked += 1;
                }
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                "{} tasks still running after {:?}, aborting",
                runtime.tasks.len(),
                self.config.shutdown_grace
            );
            runtime.tasks.shutdown().await;
        }

        self.connection_count.store(0, Ordering::Release);
        tracing::info!("{} server stopped", self.kind);

        if panicked > 0 {
            return Err(ServerError::Internal(format!("{panicked} server tasks panicked")));
        }
        Ok(())
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("local_addr", &self.local_addr)
            .field("connection_count", &self.connection_count())
            .finish_non_exhaustive()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(runtime) = &self.runtime {
            runtime.shutdown.send_replace(true);
        }
    }
}
