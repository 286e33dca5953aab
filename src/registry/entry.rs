//! Connection handle and outbound message types
//!
//! A [`ConnectionHandle`] is the registry's view of one viewer channel: an
//! id, the peer address and the sending side of that connection's bounded
//! outbound queue. The socket itself is owned by the connection's writer
//! task, which drains the queue in order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use super::error::RegistryError;

/// Registry-assigned connection identifier
pub type ConnectionId = u64;

/// A message queued for one connection
///
/// Cheap to clone: text is shared through `Arc<str>` and binary frames
/// through `Bytes` reference counting, so a fan-out never copies payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Structured JSON message
    Text(Arc<str>),
    /// Raw binary frame
    Binary(Bytes),
}

impl Outbound {
    pub fn text(text: impl Into<Arc<str>>) -> Self {
        Outbound::Text(text.into())
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Outbound::Binary(data.into())
    }

    pub fn len(&self) -> usize {
        match self {
            Outbound::Text(text) => text.len(),
            Outbound::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry entry for one connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Unique connection ID
    pub id: ConnectionId,

    /// Remote peer address, if known
    pub peer_addr: Option<SocketAddr>,

    /// When the connection was registered
    pub connected_at: Instant,

    tx: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end its writer task drains
    pub fn new(
        id: ConnectionId,
        peer_addr: Option<SocketAddr>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let handle = Self {
            id,
            peer_addr,
            connected_at: Instant::now(),
            tx,
        };

        (handle, rx)
    }

    /// Queue a message, waiting at most `timeout` for space
    pub async fn send(&self, message: Outbound, timeout: Duration) -> Result<(), RegistryError> {
        match self.tx.send_timeout(message, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => Err(RegistryError::Closed(self.id)),
            Err(SendTimeoutError::Timeout(_)) => Err(RegistryError::TimedOut(self.id)),
        }
    }

    /// Whether the writer side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
