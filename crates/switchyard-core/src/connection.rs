//! Connection: one peer, its transport, and its idle bookkeeping.
//!
//! A `Connection` is shared as `Arc<Connection>` between the pool (which
//! ages and evicts it), its reader task (which resets it on traffic), and
//! application actions (which send on it and may tag it).
//!
//! # Idle time
//!
//! Idle time is an atomic nanosecond counter. It grows only through
//! [`Connection::age`], called by the pool on every tick, and drops back to
//! zero only through [`Connection::reset_idle`], called after a successful
//! dispatch. Neither side needs a lock.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use switchyard_proto::{Envelope, LENGTH_PREFIX_SIZE, decode_length};

use crate::{
    error::{FrameError, TransportError},
    transport::Transport,
};

/// A live peer connection.
pub struct Connection {
    /// Server-assigned identifier, unique per server instance
    id: u64,
    /// Byte channel to the peer
    transport: Box<dyn Transport>,
    /// Caller-assigned label
    tag: Mutex<String>,
    /// Nanoseconds since last successful dispatch
    idle_ns: AtomicU64,
}

impl Connection {
    /// Create a connection over `transport`.
    pub fn new(id: u64, transport: impl Transport + 'static) -> Self {
        Self {
            id,
            transport: Box::new(transport),
            tag: Mutex::new(String::new()),
            idle_ns: AtomicU64::new(0),
        }
    }

    /// Server-assigned identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote address, if the transport has one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.transport.peer_addr()
    }

    /// Caller-assigned tag. Empty until set.
    pub fn tag(&self) -> String {
        self.tag.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the tag.
    pub fn set_tag(&self, tag: impl Into<String>) {
        *self.tag.lock().unwrap_or_else(PoisonError::into_inner) = tag.into();
    }

    /// Time since the last successful dispatch, as accumulated by ticks.
    pub fn idle_time(&self) -> Duration {
        Duration::from_nanos(self.idle_ns.load(Ordering::Acquire))
    }

    /// Add `by` to the idle time and return the new value.
    ///
    /// Saturates at `u64::MAX` nanoseconds (about 584 years).
    pub fn age(&self, by: Duration) -> Duration {
        let by_ns = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let previous = self
            .idle_ns
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |ns| Some(ns.saturating_add(by_ns)))
            .unwrap_or_else(|ns| ns);
        Duration::from_nanos(previous.saturating_add(by_ns))
    }

    /// Reset idle time to zero.
    pub fn reset_idle(&self) {
        self.idle_ns.store(0, Ordering::Release);
    }

    /// Whether idle time has reached `threshold`.
    pub fn is_expired(&self, threshold: Duration) -> bool {
        self.idle_time() >= threshold
    }

    /// Send raw bytes.
    ///
    /// # Errors
    ///
    /// - `TransportError::Closed` if the connection is closed
    /// - `TransportError::Io` if the write fails
    pub async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        self.transport.send(data).await
    }

    /// Read exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// See [`Transport::receive_exact`].
    pub async fn receive_exact(&self, len: usize) -> Result<Bytes, TransportError> {
        self.transport.receive_exact(len).await
    }

    /// Close the connection and release the socket. Idempotent.
    pub fn close(&self) {
        if !self.transport.is_closed() {
            tracing::debug!(connection_id = self.id, "closing connection");
        }
        self.transport.close();
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Frame and send an envelope in a single write.
    ///
    /// # Errors
    ///
    /// - `FrameError::Protocol` if the envelope cannot be encoded
    /// - `FrameError::Transport` if the send fails
    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<(), FrameError> {
        let frame = envelope.to_frame()?;
        self.send(&frame).await?;
        Ok(())
    }

    /// Read one framed envelope whose body is at most `max_size` bytes.
    ///
    /// # Errors
    ///
    /// - `FrameError::Transport` if the channel fails mid-frame
    /// - `FrameError::Protocol` if the prefix is negative or over `max_size`,
    ///   or the body is not a valid envelope
    pub async fn receive_envelope(&self, max_size: usize) -> Result<Envelope, FrameError> {
        let prefix = self.receive_exact(LENGTH_PREFIX_SIZE).await?;

        let mut raw = [0u8; LENGTH_PREFIX_SIZE];
        raw.copy_from_slice(&prefix);
        let len = decode_length(raw, max_size)?;

        let body = self.receive_exact(len).await?;
        Ok(Envelope::from_bytes(&body)?)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer_addr())
            .field("tag", &self.tag())
            .field("idle_time", &self.idle_time())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use switchyard_proto::{MAX_ENVELOPE_SIZE, ProtocolError};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex, split};

    use super::*;
    use crate::transport::StreamTransport;

    fn connection(id: u64) -> (Connection, DuplexStream) {
        let (local, remote) = duplex(4096);
        let (reader, writer) = split(local);
        (Connection::new(id, StreamTransport::new(reader, writer, None)), remote)
    }

    #[test]
    fn new_connection_is_fresh() {
        let (local, _remote) = duplex(16);
        let (reader, writer) = split(local);
        let conn = Connection::new(7, StreamTransport::new(reader, writer, None));

        assert_eq!(conn.id(), 7);
        assert_eq!(conn.tag(), "");
        assert_eq!(conn.idle_time(), Duration::ZERO);
        assert!(!conn.is_closed());
    }

    #[test]
    fn tag_is_mutable() {
        let (local, _remote) = duplex(16);
        let (reader, writer) = split(local);
        let conn = Connection::new(1, StreamTransport::new(reader, writer, None));

        conn.set_tag("player-1");
        assert_eq!(conn.tag(), "player-1");
    }

    #[test]
    fn age_accumulates_and_reset_clears() {
        let (local, _remote) = duplex(16);
        let (reader, writer) = split(local);
        let conn = Connection::new(1, StreamTransport::new(reader, writer, None));

        assert_eq!(conn.age(Duration::from_millis(100)), Duration::from_millis(100));
        assert_eq!(conn.age(Duration::from_millis(100)), Duration::from_millis(200));
        assert!(conn.is_expired(Duration::from_millis(200)));
        assert!(!conn.is_expired(Duration::from_millis(201)));

        conn.reset_idle();
        assert_eq!(conn.idle_time(), Duration::ZERO);
    }

    #[test]
    fn sub_millisecond_ages_are_not_lost() {
        let (local, _remote) = duplex(16);
        let (reader, writer) = split(local);
        let conn = Connection::new(1, StreamTransport::new(reader, writer, None));

        for _ in 0..10 {
            conn.age(Duration::from_micros(500));
        }
        assert_eq!(conn.idle_time(), Duration::from_millis(5));
        assert!(conn.is_expired(Duration::from_millis(5)));

        conn.age(Duration::from_micros(1_500));
        assert_eq!(conn.idle_time(), Duration::from_micros(6_500));
    }

    #[tokio::test]
    async fn receive_envelope_reads_one_frame() {
        let (conn, mut remote) = connection(1);

        let first = Envelope::new("Ping", Vec::new());
        let second = Envelope::new("Move", vec![1, 2, 3]);
        let mut wire = first.to_frame().unwrap();
        wire.extend(second.to_frame().unwrap());
        remote.write_all(&wire).await.unwrap();

        assert_eq!(conn.receive_envelope(MAX_ENVELOPE_SIZE).await.unwrap(), first);
        assert_eq!(conn.receive_envelope(MAX_ENVELOPE_SIZE).await.unwrap(), second);
    }

    #[tokio::test]
    async fn receive_envelope_rejects_negative_prefix() {
        let (conn, mut remote) = connection(1);

        remote.write_all(&(-1i32).to_le_bytes()).await.unwrap();

        let result = conn.receive_envelope(MAX_ENVELOPE_SIZE).await;
        assert_eq!(result, Err(FrameError::Protocol(ProtocolError::NegativeLength(-1))));
    }

    #[tokio::test]
    async fn receive_envelope_rejects_oversized_prefix() {
        let (conn, mut remote) = connection(1);

        remote.write_all(&2048i32.to_le_bytes()).await.unwrap();

        let result = conn.receive_envelope(1024).await;
        assert_eq!(
            result,
            Err(FrameError::Protocol(ProtocolError::EnvelopeTooLarge { size: 2048, max: 1024 }))
        );
    }

    #[tokio::test]
    async fn receive_envelope_reports_disconnect_mid_frame() {
        let (conn, mut remote) = connection(1);

        let frame = Envelope::new("Ping", vec![0; 32]).to_frame().unwrap();
        remote.write_all(&frame[..10]).await.unwrap();
        drop(remote);

        let result = conn.receive_envelope(MAX_ENVELOPE_SIZE).await;
        assert!(matches!(
            result,
            Err(FrameError::Transport(TransportError::PeerDisconnected { .. }))
        ));
    }

    #[tokio::test]
    async fn send_envelope_writes_one_frame() {
        let (conn, mut remote) = connection(1);

        let envelope = Envelope::new("Pong", vec![42]);
        conn.send_envelope(&envelope).await.unwrap();

        let expected = envelope.to_frame().unwrap();
        let mut buf = vec![0u8; expected.len()];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn closed_connection_rejects_send() {
        let (conn, _remote) = connection(1);

        conn.close();
        conn.close();

        assert_eq!(conn.send(b"late").await, Err(TransportError::Closed));
    }
}
