//! Connection registry implementation
//!
//! The set of currently reachable viewer connections and the fan-out
//! primitives the encoder drives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::join_all;
use tokio::sync::RwLock;

use crate::stats::RelayStats;

use super::config::RegistryConfig;
use super::entry::{ConnectionHandle, ConnectionId, Outbound};
use super::error::RegistryError;

/// Registry of active viewer connections
///
/// Membership changes take the write lock; counts and broadcasts take a
/// snapshot under the read lock and release it before any send is awaited,
/// so joins and leaves never wait on a slow fan-out.
pub struct ConnectionRegistry {
    /// Active connections keyed by ID
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,

    /// Next ID handed out by [`ConnectionRegistry::next_id`]
    next_id: AtomicU64,

    stats: Arc<RelayStats>,

    /// Configuration
    config: RegistryConfig,
}

impl ConnectionRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stats: Arc::new(RelayStats::new()),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Shared relay counters
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Allocate a connection ID
    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate an ID and create a handle sized by this registry's config
    pub fn open_handle(
        &self,
        peer_addr: Option<std::net::SocketAddr>,
    ) -> (ConnectionHandle, tokio::sync::mpsc::Receiver<Outbound>) {
        ConnectionHandle::new(self.next_id(), peer_addr, self.config.outbound_capacity)
    }

    /// Register a connection
    pub async fn add(&self, handle: ConnectionHandle) {
        let id = handle.id;
        let peer = handle.peer_addr;

        let count = {
            let mut connections = self.connections.write().await;
            if connections.insert(id, handle).is_none() {
                self.stats.on_connect();
            }
            connections.len()
        };

        tracing::info!(
            connection_id = id,
            peer = ?peer,
            connections = count,
            "Connection registered"
        );
    }

    /// Unregister a connection
    ///
    /// Returns false if it was not registered (already removed or evicted).
    pub async fn remove(&self, id: ConnectionId) -> bool {
        self.remove_inner(id, false).await
    }

    async fn remove_inner(&self, id: ConnectionId, evicted: bool) -> bool {
        let (removed, count) = {
            let mut connections = self.connections.write().await;
            let removed = connections.remove(&id);
            (removed, connections.len())
        };

        match removed {
            Some(handle) => {
                self.stats.on_disconnect(evicted);
                tracing::info!(
                    connection_id = id,
                    peer = ?handle.peer_addr,
                    evicted = evicted,
                    connections = count,
                    "Connection removed"
                );
                true
            }
            None => false,
        }
    }

    /// Check if a connection is registered
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    /// Number of registered connections not listed in `exclude`
    ///
    /// Used for logging only.
    pub async fn count(&self, exclude: &[ConnectionId]) -> usize {
        let connections = self.connections.read().await;
        connections
            .keys()
            .filter(|id| !exclude.contains(id))
            .count()
    }

    /// Send a structured message to every connection except `exclude`
    ///
    /// Returns the number of connections that accepted the message.
    pub async fn broadcast_text(&self, text: impl Into<Arc<str>>, exclude: &[ConnectionId]) -> usize {
        self.fan_out(Outbound::Text(text.into()), exclude).await
    }

    /// Send a binary frame to every connection except `exclude`
    pub async fn broadcast_binary(&self, data: Bytes, exclude: &[ConnectionId]) -> usize {
        self.fan_out(Outbound::Binary(data), exclude).await
    }

    /// Send one message to one connection
    ///
    /// A failed send evicts the connection, like a failed broadcast would.
    pub async fn send_to(&self, id: ConnectionId, message: Outbound) -> Result<(), RegistryError> {
        let handle = self
            .connections
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotRegistered(id))?;

        match handle.send(message, self.config.send_timeout).await {
            Ok(()) => {
                self.stats.on_delivered(1);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(connection_id = id, error = %e, "Send failed, evicting");
                self.remove_inner(id, true).await;
                Err(e)
            }
        }
    }

    async fn fan_out(&self, message: Outbound, exclude: &[ConnectionId]) -> usize {
        let targets: Vec<ConnectionHandle> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .filter(|handle| !exclude.contains(&handle.id))
                .cloned()
                .collect()
        };

        if targets.is_empty() {
            return 0;
        }

        let timeout = self.config.send_timeout;
        let results = join_all(targets.iter().map(|handle| {
            let message = message.clone();
            async move { (handle.id, handle.send(message, timeout).await) }
        }))
        .await;

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(connection_id = id, error = %e, "Broadcast send failed, evicting");
                    failed.push(id);
                }
            }
        }

        for id in failed {
            self.remove_inner(id, true).await;
        }

        self.stats.on_delivered(delivered);
        delivered
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
