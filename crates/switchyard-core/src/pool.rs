//! Pool of admitted connections and idle-timeout eviction.
//!
//! The pool has a single owner: the server's dispatch loop. Accept paths
//! never touch it directly; they hand connections over through the admission
//! queue and the loop calls [`ConnectionPool::admit`]. Reader tasks share the
//! same `Arc<Connection>` and only ever touch its atomic idle counter, so the
//! pool itself needs no lock.
//!
//! Time is driven from outside. Each tick the owner calls
//! [`ConnectionPool::tick`] with the tick interval, then
//! [`ConnectionPool::evict_expired`] with the timeout threshold. Tests drive
//! both directly without sleeping.

use std::{sync::Arc, time::Duration};

use crate::connection::Connection;

/// Ordered set of live connections, keyed by connection id.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    /// Admission order is preserved
    connections: Vec<Arc<Connection>>,
}

impl ConnectionPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the pool.
    ///
    /// Returns `false` (and leaves the pool unchanged) if a connection with
    /// the same id is already pooled.
    pub fn admit(&mut self, conn: Arc<Connection>) -> bool {
        if self.contains(conn.id()) {
            tracing::warn!(connection_id = conn.id(), "connection already pooled");
            return false;
        }

        tracing::debug!(connection_id = conn.id(), peer = ?conn.peer_addr(), "admitted connection");
        self.connections.push(conn);
        true
    }

    /// Age every pooled connection by exactly `interval`.
    pub fn tick(&self, interval: Duration) {
        for conn in &self.connections {
            conn.age(interval);
        }
    }

    /// Close and remove every connection whose idle time reached `threshold`.
    ///
    /// Returns the evicted connections in admission order.
    pub fn evict_expired(&mut self, threshold: Duration) -> Vec<Arc<Connection>> {
        let (expired, live): (Vec<_>, Vec<_>) =
            self.connections.drain(..).partition(|conn| conn.is_expired(threshold));
        self.connections = live;

        for conn in &expired {
            tracing::info!(
                connection_id = conn.id(),
                idle_ms = conn.idle_time().as_millis(),
                "evicting idle connection"
            );
            conn.close();
        }

        expired
    }

    /// Remove a connection by id without closing it.
    pub fn remove(&mut self, id: u64) -> Option<Arc<Connection>> {
        let index = self.connections.iter().position(|conn| conn.id() == id)?;
        Some(self.connections.remove(index))
    }

    /// Close and remove every connection.
    pub fn close_all(&mut self) -> usize {
        let count = self.connections.len();
        for conn in self.connections.drain(..) {
            conn.close();
        }
        count
    }

    /// Whether a connection with `id` is pooled.
    pub fn contains(&self, id: u64) -> bool {
        self.connections.iter().any(|conn| conn.id() == id)
    }

    /// Number of pooled connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
