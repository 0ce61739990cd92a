//! Socket-backed transports.
//!
//! The stream variant wraps the two halves of a `TcpStream` in the core
//! [`StreamTransport`]. The datagram variant has no per-peer socket: one
//! shared `UdpSocket` receives for every peer, and a router (see
//! [`crate::accept`]) feeds each remote endpoint's datagrams into that
//! endpoint's [`DatagramTransport`] inbox. Reads consume the inbox as a byte
//! stream, so a frame may span datagrams or share one with other frames.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use switchyard_core::{StreamTransport, Transport, TransportError};
use tokio::{
    net::{
        TcpStream, UdpSocket,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex, mpsc, watch},
};

/// Transport over an accepted TCP stream.
pub type TcpTransport = StreamTransport<OwnedReadHalf, OwnedWriteHalf>;

/// Wrap an accepted TCP stream.
pub fn tcp_transport(stream: TcpStream, peer: SocketAddr) -> TcpTransport {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }
    let (reader, writer) = stream.into_split();
    StreamTransport::new(reader, writer, Some(peer))
}

/// Sender half of a datagram endpoint's inbox, held by the router.
pub type DatagramInbox = mpsc::UnboundedSender<Bytes>;

/// Transport for one remote UDP endpoint on a shared socket.
pub struct DatagramTransport {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    inbox: Mutex<InboxReader>,
    closed: watch::Sender<bool>,
}

/// Received datagrams plus bytes left over from a partial read.
struct InboxReader {
    datagrams: mpsc::UnboundedReceiver<Bytes>,
    pending: BytesMut,
}

impl InboxReader {
    async fn fill(&mut self, len: usize) -> Result<Bytes, TransportError> {
        while self.pending.len() < len {
            match self.datagrams.recv().await {
                Some(datagram) => self.pending.extend_from_slice(&datagram),
                None => {
                    return Err(TransportError::PeerDisconnected {
                        expected: len,
                        received: self.pending.len(),
                    });
                },
            }
        }
        Ok(self.pending.split_to(len).freeze())
    }
}

impl DatagramTransport {
    /// Create a transport for `peer` and the inbox that feeds it.
    ///
    /// Closing the transport closes the inbox, so the router sees send
    /// failures and knows to create a fresh connection for the endpoint.
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> (DatagramInbox, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let transport = Self {
            socket,
            peer,
            inbox: Mutex::new(InboxReader { datagrams: rx, pending: BytesMut::new() }),
            closed,
        };
        (tx, transport)
    }

    fn close_inbox(&self) {
        if let Ok(mut inbox) = self.inbox.try_lock() {
            inbox.datagrams.close();
        }
    }
}

#[async_trait]
impl Transport for DatagramTransport {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let written = self.socket.send_to(data, self.peer).await?;
        if written != data.len() {
            return Err(TransportError::Io(format!(
                "short datagram write: {written} of {} bytes",
                data.len()
            )));
        }
        Ok(())
    }

    async fn receive_exact(&self, len: usize) -> Result<Bytes, TransportError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(TransportError::Closed);
        }

        let mut inbox = self.inbox.lock().await;
        let result = tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => Err(TransportError::Closed),
            filled = inbox.fill(len) => filled,
        };

        drop(inbox);
        if self.is_closed() {
            self.close_inbox();
        }

        result
    }

    fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        // An in-flight read closes the inbox itself once it unlocks.
        self.close_inbox();
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}
