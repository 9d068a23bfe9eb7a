//! Registry of live client connections.
//!
//! The acceptor registers a connection before its handler starts; the
//! handler removes it on disconnect or error. Every mutation goes through
//! one mutex.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Server-assigned connection identifier.
pub type ConnectionId = u64;

/// Route back to one connection's writer task.
///
/// Cloned into every job so the dispatcher can answer the connection that
/// submitted it. Sending after the connection is gone is a no-op.
#[derive(Debug, Clone)]
pub struct Replier {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
}

impl Replier {
    pub const fn new(id: ConnectionId, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self { id, outbound }
    }

    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame for the connection. Returns `false` if it is closed.
    pub fn send(&self, wire: String) -> bool {
        self.outbound.send(wire).is_ok()
    }
}

#[derive(Debug)]
struct ConnectionEntry {
    peer: SocketAddr,
    /// Held so the writer stays up while the connection is registered.
    _replier: Replier,
}

/// Shared set of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh connection id.
    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn register(&self, peer: SocketAddr, replier: Replier) {
        let id = replier.id();
        let mut connections = self.connections.lock().await;
        connections.insert(
            id,
            ConnectionEntry {
                peer,
                _replier: replier,
            },
        );
        debug!(connection = id, peer = %peer, live = connections.len(), "Registered connection");
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.lock().await;
        match connections.remove(&id) {
            Some(entry) => {
                debug!(connection = id, peer = %entry.peer, live = connections.len(), "Unregistered connection");
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Drop every connection, returning how many were live.
    pub async fn clear(&self) -> usize {
        let mut connections = self.connections.lock().await;
        let count = connections.len();
        connections.clear();
        count
    }
}
