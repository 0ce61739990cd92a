//! Connection producers.
//!
//! Both variants end the same way: a fresh `Arc<Connection>` pushed onto the
//! admission queue for the dispatch loop. They differ in where connections
//! come from.
//!
//! - Stream: a fixed pool of accept tasks shares one listener. Each task
//!   re-issues `accept` as soon as the previous one completes, so at most
//!   `accept_pool_size` accepts are outstanding and the listener is always
//!   ready.
//! - Datagram: one router task owns the receive side of the shared socket
//!   and maps each remote endpoint to a connection, creating one on the
//!   first datagram and again after the previous one was closed.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use switchyard_core::Connection;
use tokio::{
    net::{TcpListener, UdpSocket},
    sync::{mpsc, watch},
    task::JoinSet,
};

use crate::{
    lifecycle::shutdown_requested,
    transport::{DatagramInbox, DatagramTransport, tcp_transport},
};

/// Delay before retrying after a failed accept (e.g. out of descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Largest UDP payload
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Queue from producers to the dispatch loop.
pub(crate) type Admissions = mpsc::UnboundedSender<Arc<Connection>>;

/// Sequential connection ids, unique per server.
#[derive(Debug, Default)]
pub(crate) struct ConnectionIds(AtomicU64);

impl ConnectionIds {
    pub(crate) fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Shared state handed to every producer task.
#[derive(Clone)]
pub(crate) struct Producer {
    pub(crate) admissions: Admissions,
    pub(crate) ids: Arc<ConnectionIds>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

/// Spawn `pool_size` accept tasks on `listener`.
pub(crate) fn spawn_acceptors(
    tasks: &mut JoinSet<()>,
    listener: &Arc<TcpListener>,
    pool_size: usize,
    producer: &Producer,
) {
    for slot in 0..pool_size {
        tasks.spawn(accept_loop(slot, Arc::clone(listener), producer.clone()));
    }
    tracing::debug!("Spawned {} accept tasks", pool_size);
}

async fn accept_loop(slot: usize, listener: Arc<TcpListener>, mut producer: Producer) {
    loop {
        let accepted = tokio::select! {
            () = shutdown_requested(&mut producer.shutdown) => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let conn = Arc::new(Connection::new(producer.ids.next(), tcp_transport(stream, peer)));
                tracing::debug!(
                    "Accepted connection {} from {} on slot {}",
                    conn.id(),
                    peer,
                    slot
                );

                if producer.admissions.send(conn).is_err() {
                    break;
                }
            },
            Err(e) => {
                tracing::warn!("Accept error on slot {}: {}", slot, e);
                tokio::select! {
                    () = shutdown_requested(&mut producer.shutdown) => break,
                    () = tokio::time::sleep(ACCEPT_BACKOFF) => {},
                }
            },
        }
    }
}

/// Router-side view of one remote endpoint.
struct Endpoint {
    inbox: DatagramInbox,
    conn: Weak<Connection>,
}

impl Endpoint {
    fn is_live(&self) -> bool {
        !self.inbox.is_closed() && self.conn.upgrade().is_some_and(|conn| !conn.is_closed())
    }
}

/// Receive datagrams on `socket` and route them to per-endpoint connections.
pub(crate) async fn route_datagrams(socket: Arc<UdpSocket>, mut producer: Producer) {
    let mut endpoints: HashMap<SocketAddr, Endpoint> = HashMap::new();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let received = tokio::select! {
            () = shutdown_requested(&mut producer.shutdown) => break,
            received = socket.recv_from(&mut buf) => received,
        };

        let (len, peer) = match received {
            Ok(received) => received,
            Err(e) => {
                // ICMP errors from earlier sends surface here on some
                // platforms; they do not affect other endpoints.
                tracing::debug!("Datagram receive error: {}", e);
                continue;
            },
        };

        let datagram = Bytes::copy_from_slice(&buf[..len]);
        let datagram = match endpoints.get(&peer).filter(|endpoint| endpoint.is_live()) {
            Some(endpoint) => match endpoint.inbox.send(datagram) {
                Ok(()) => continue,
                Err(mpsc::error::SendError(datagram)) => datagram,
            },
            None => datagram,
        };

        endpoints.retain(|_, endpoint| endpoint.is_live());

        let (inbox, transport) = DatagramTransport::new(Arc::clone(&socket), peer);
        let conn = Arc::new(Connection::new(producer.ids.next(), transport));
        tracing::debug!("New datagram endpoint {} as connection {}", peer, conn.id());

        // Receiver is alive: it lives in the transport we still hold.
        let _ = inbox.send(datagram);
        endpoints.insert(peer, Endpoint { inbox, conn: Arc::downgrade(&conn) });

        if producer.admissions.send(conn).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one_and_increase() {
        let ids = ConnectionIds::default();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
    }
}
