//! Transport seam between a [`Connection`](crate::Connection) and a socket.
//!
//! A transport moves raw bytes. It knows nothing about envelopes; framing
//! lives on [`Connection`](crate::Connection). Two families exist:
//!
//! - [`StreamTransport`]: any `AsyncRead`/`AsyncWrite` pair. TCP halves in
//!   production, `tokio::io::duplex` halves in tests.
//! - Datagram transports (server crate): one remote UDP endpoint fed by a
//!   shared socket.
//!
//! # Close semantics
//!
//! `close` is synchronous and idempotent. It flips a watch flag that every
//! in-flight `send`/`receive_exact` selects on, so a reader parked on a
//! silent peer wakes up with [`TransportError::Closed`] instead of holding
//! the socket open forever. `close` drops whichever halves are free; an
//! operation holding a half re-checks the flag after releasing its lock and
//! drops that half itself, so a closed transport never keeps the socket.
//!
//! Reads grow their buffer as bytes arrive instead of allocating the full
//! requested length up front.

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{Mutex, watch},
};

use crate::error::TransportError;

/// First allocation for a read; longer reads grow by this much at a time
const READ_CHUNK: usize = 64 * 1024;

/// Byte channel underneath a connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write all of `data` to the peer.
    ///
    /// # Errors
    ///
    /// - `TransportError::Closed` if the transport is closed
    /// - `TransportError::Io` if the write fails
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Read exactly `len` bytes, suspending until they arrive.
    ///
    /// # Errors
    ///
    /// - `TransportError::Closed` if the transport is or becomes closed
    /// - `TransportError::PeerDisconnected` if the peer ends the stream first
    /// - `TransportError::Io` if the read fails
    async fn receive_exact(&self, len: usize) -> Result<Bytes, TransportError>;

    /// Close the channel. Idempotent.
    fn close(&self);

    /// Whether [`Transport::close`] has been called.
    fn is_closed(&self) -> bool;

    /// Remote address, if the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// Transport over an async reader/writer pair.
pub struct StreamTransport<R, W> {
    reader: Mutex<Option<R>>,
    writer: Mutex<Option<W>>,
    closed: watch::Sender<bool>,
    peer: Option<SocketAddr>,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap a reader/writer pair.
    pub fn new(reader: R, writer: W, peer: Option<SocketAddr>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            closed,
            peer,
        }
    }
}

#[async_trait]
impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(TransportError::Closed);
        }

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(TransportError::Closed);
        };

        let result = tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Err(TransportError::Closed),
            written = write_flush(writer, data) => written,
        };

        drop(guard);
        if self.is_closed() {
            release(&self.writer);
        }

        result
    }

    async fn receive_exact(&self, len: usize) -> Result<Bytes, TransportError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(TransportError::Closed);
        }

        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Err(TransportError::Closed);
        };

        let mut buf = BytesMut::with_capacity(len.min(READ_CHUNK));
        let result = tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Err(TransportError::Closed),
            filled = fill(reader, &mut buf, len) => filled,
        };

        drop(guard);
        if self.is_closed() {
            release(&self.reader);
        }

        result.map(|()| buf.freeze())
    }

    fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        // A half locked by an in-flight operation is released by that
        // operation once it unlocks.
        release(&self.writer);
        release(&self.reader);
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

/// Drop a half unless someone else holds its lock.
fn release<T>(half: &Mutex<Option<T>>) {
    if let Ok(mut half) = half.try_lock() {
        half.take();
    }
}

/// Append bytes to `buf` until it holds `len`, reporting how far we got on
/// end of stream.
async fn fill<R>(reader: &mut R, buf: &mut BytesMut, len: usize) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    while buf.len() < len {
        let remaining = len - buf.len();
        if buf.capacity() == buf.len() {
            buf.reserve(remaining.min(READ_CHUNK));
        }

        let limit = u64::try_from(remaining).unwrap_or(u64::MAX);
        let n = (&mut *reader).take(limit).read_buf(buf).await?;
        if n == 0 {
            return Err(TransportError::PeerDisconnected { expected: len, received: buf.len() });
        }
    }
    Ok(())
}

async fn write_flush<W>(writer: &mut W, data: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}
