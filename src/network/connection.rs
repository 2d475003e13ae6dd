//! Connection Handles
//!
//! Every accepted socket gets a [`ConnectionId`] and an outbound channel.
//! Sessions keep clones of the handle; the socket task owns the receiving end
//! and writes whatever arrives to the WebSocket.

use std::collections::BTreeMap;
use std::fmt;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::network::protocol::ServerMessage;

/// Opaque connection identifier, issued at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Issue a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First group is enough to tell connections apart in logs.
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// Sending side of a client connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<ServerMessage>,
}

impl ConnectionHandle {
    /// Wrap an existing outbound channel.
    pub fn new(sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id: ConnectionId::new(),
            sender,
        }
    }

    /// Create a handle together with the receiver the socket task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message without waiting.
    ///
    /// Returns `false` when the frame was dropped because the connection is
    /// closing or its buffer is full.
    pub fn send(&self, message: ServerMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound buffer full for {}, dropping frame", self.id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Connection {} closed, dropping frame", self.id);
                false
            }
        }
    }
}

/// Live connection set owned by the gateway.
pub struct ConnectionRegistry {
    connections: RwLock<BTreeMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a connection.
    pub async fn add(&self, handle: ConnectionHandle) {
        let mut connections = self.connections.write().await;
        connections.insert(handle.id(), handle);
    }

    /// Remove a connection. Returns the handle if it was registered.
    pub async fn remove(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        let mut connections = self.connections.write().await;
        connections.remove(id)
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
