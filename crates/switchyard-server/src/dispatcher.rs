//! The dispatch loop: sole owner of the connection pool.
//!
//! One task runs [`Dispatcher::run`]. It admits connections from the
//! admission queue, drives the idle-timer tick, evicts expired connections,
//! and reaps reader tasks. Each admitted connection gets one reader task
//! ([`service_connection`]) that reads frames in order and dispatches them
//! through the registry, so a slow handler only delays its own connection.
//!
//! # Faults
//!
//! - Transport fault: the reader stops and leaves idle time alone. The
//!   connection stays pooled until the tick evicts it.
//! - Protocol fault: the stream cannot be resynchronized, so the reader
//!   closes the connection and the loop drops it from the pool on reap.
//! - Dispatch failure: logged; the connection keeps being read.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use switchyard_core::{
    Connection, ConnectionPool, DispatchOutcome, FrameError, Registry, TransportError,
};
use tokio::{
    sync::{mpsc, watch},
    task::{JoinError, JoinSet},
    time::MissedTickBehavior,
};

use crate::{ConnectedHook, lifecycle::shutdown_requested};

/// How a reader task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReaderExit {
    /// Channel closed or failed; eviction is left to the timeout
    Stopped(u64),
    /// Peer sent bytes that are not a valid frame; connection closed
    Faulted(u64),
}

/// Timing and limits for the dispatch loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DispatchSettings {
    pub(crate) tick_interval: Duration,
    pub(crate) timeout_threshold: Duration,
    pub(crate) max_envelope_size: usize,
}

pub(crate) struct Dispatcher {
    registry: Arc<Registry>,
    settings: DispatchSettings,
    pool: ConnectionPool,
    admissions: mpsc::UnboundedReceiver<Arc<Connection>>,
    shutdown: watch::Receiver<bool>,
    readers: JoinSet<ReaderExit>,
    on_connected: Option<ConnectedHook>,
    connection_count: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<Registry>,
        settings: DispatchSettings,
        admissions: mpsc::UnboundedReceiver<Arc<Connection>>,
        shutdown: watch::Receiver<bool>,
        on_connected: Option<ConnectedHook>,
        connection_count: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            registry,
            settings,
            pool: ConnectionPool::new(),
            admissions,
            shutdown,
            readers: JoinSet::new(),
            on_connected,
            connection_count,
        }
    }

    /// Run until shutdown, then close everything.
    pub(crate) async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        // First tick completes immediately; connections age one interval
        // after admission, not at it.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = shutdown_requested(&mut self.shutdown) => break,
                _ = ticker.tick() => self.on_tick(),
                Some(conn) = self.admissions.recv() => self.admit(conn),
                Some(exit) = self.readers.join_next(), if !self.readers.is_empty() => {
                    self.reap(exit);
                },
            }
        }

        self.close_all().await;
    }

    fn admit(&mut self, conn: Arc<Connection>) {
        if !self.pool.admit(Arc::clone(&conn)) {
            conn.close();
            return;
        }
        self.publish_count();

        if let Some(hook) = &self.on_connected
            && panic::catch_unwind(AssertUnwindSafe(|| hook(&conn))).is_err()
        {
            tracing::error!("on_connected hook panicked for connection {}", conn.id());
        }

        self.readers.spawn(service_connection(
            conn,
            Arc::clone(&self.registry),
            self.settings.max_envelope_size,
        ));
    }

    fn on_tick(&mut self) {
        self.pool.tick(self.settings.tick_interval);
        let evicted = self.pool.evict_expired(self.settings.timeout_threshold);
        if !evicted.is_empty() {
            self.publish_count();
        }
    }

    fn reap(&mut self, exit: Result<ReaderExit, JoinError>) {
        match exit {
            Ok(ReaderExit::Stopped(id)) => {
                tracing::trace!("Reader for connection {} stopped", id);
            },
            Ok(ReaderExit::Faulted(id)) => {
                if self.pool.remove(id).is_some() {
                    tracing::debug!("Removed faulted connection {}", id);
                    self.publish_count();
                }
            },
            Err(e) if e.is_panic() => tracing::error!("Reader task panicked: {}", e),
            Err(e) => tracing::debug!("Reader task cancelled: {}", e),
        }
    }

    async fn close_all(&mut self) {
        self.admissions.close();
        let mut pending = 0;
        while let Ok(conn) = self.admissions.try_recv() {
            conn.close();
            pending += 1;
        }

        let pooled = self.pool.close_all();
        self.readers.shutdown().await;
        self.connection_count.store(0, Ordering::Release);

        tracing::info!(
            "Dispatch loop stopped, closed {} pooled and {} pending connections",
            pooled,
            pending
        );
    }

    fn publish_count(&self) {
        self.connection_count.store(self.pool.len(), Ordering::Release);
    }
}

/// Read and dispatch frames from one connection until it fails or closes.
pub(crate) async fn service_connection(
    conn: Arc<Connection>,
    registry: Arc<Registry>,
    max_envelope_size: usize,
) -> ReaderExit {
    let id = conn.id();

    loop {
        let envelope = match conn.receive_envelope(max_envelope_size).await {
            Ok(envelope) => envelope,
            Err(FrameError::Transport(TransportError::Closed)) => {
                return ReaderExit::Stopped(id);
            },
            Err(FrameError::Transport(e)) => {
                tracing::debug!("Transport fault on connection {}, awaiting eviction: {}", id, e);
                return ReaderExit::Stopped(id);
            },
            Err(FrameError::Protocol(e)) => {
                tracing::warn!("Protocol fault on connection {}, closing: {}", id, e);
                conn.close();
                return ReaderExit::Faulted(id);
            },
        };

        match registry.dispatch(envelope, &conn).await {
            Ok(outcome) => {
                conn.reset_idle();
                if outcome == DispatchOutcome::Handled {
                    tracing::trace!("Dispatched envelope on connection {}", id);
                }
            },
            Err(e) => tracing::warn!("Dispatch failed on connection {}: {}", id, e),
        }
    }
}
