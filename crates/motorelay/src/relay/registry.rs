//! Live connection registry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use crate::protocol::Frame;

/// Identifier assigned to a connection on registration. Never reused.
pub type ConnectionId = u64;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers whose buffer accepted the frame.
    pub delivered: usize,
    /// Peers whose buffer was full or closed.
    pub dropped: usize,
}

#[derive(Debug)]
struct Peer {
    addr: SocketAddr,
    outbound: mpsc::Sender<Frame>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: ConnectionId,
    peers: HashMap<ConnectionId, Peer>,
}

/// The set of connected peers.
///
/// Every method takes the lock for a short, non-async critical section.
/// Broadcasting never waits on a peer: each copy is offered with
/// `try_send` and dropped if that peer's buffer is full.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a peer and return its id.
    pub fn register(&self, addr: SocketAddr, outbound: mpsc::Sender<Frame>) -> ConnectionId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.peers.insert(id, Peer { addr, outbound });
        id
    }

    /// Remove a peer. Returns `false` if it was not registered.
    pub fn deregister(&self, id: ConnectionId) -> bool {
        self.lock().peers.remove(&id).is_some()
    }

    /// Offer `frame` to every peer except `from`.
    pub fn broadcast(&self, from: ConnectionId, frame: &Frame) -> BroadcastReport {
        let inner = self.lock();
        let mut report = BroadcastReport::default();

        for (id, peer) in inner.peers.iter().filter(|(id, _)| **id != from) {
            match peer.outbound.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    trace!(peer = id, addr = %peer.addr, error = %e, "Dropping frame for peer");
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Drop every peer's outbound channel, letting their writers close.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.peers.len();
        inner.peers.clear();
        count
    }

    /// Number of connected peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().peers.len()
    }

    /// Whether no peer is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connected peers, ordered by id.
    #[must_use]
    pub fn peers(&self) -> Vec<(ConnectionId, SocketAddr)> {
        let mut peers: Vec<_> = self
            .lock()
            .peers
            .iter()
            .map(|(id, peer)| (*id, peer.addr))
            .collect();
        peers.sort_unstable_by_key(|(id, _)| *id);
        peers
    }
}
