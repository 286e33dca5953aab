//! Statistics for the relay

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live relay counters
///
/// Shared by the registry, the encoder and the ingest path. Counters only
/// ever feed logs and snapshots, never protocol decisions.
#[derive(Debug)]
pub struct RelayStats {
    started_at: Instant,
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    evicted_connections: AtomicU64,
    events_broadcast: AtomicU64,
    payload_bytes_broadcast: AtomicU64,
    messages_sent: AtomicU64,
    uploads_accepted: AtomicU64,
    uploads_rejected: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    /// Total connections ever registered
    pub total_connections: u64,
    /// Currently registered connections
    pub active_connections: u64,
    /// Connections dropped because a send failed or timed out
    pub evicted_connections: u64,
    /// Completed broadcast cycles
    pub events_broadcast: u64,
    /// Decoded payload bytes across all broadcast cycles
    pub payload_bytes_broadcast: u64,
    /// Individual per-connection deliveries
    pub messages_sent: u64,
    /// Producer uploads accepted
    pub uploads_accepted: u64,
    /// Producer uploads rejected at ingestion
    pub uploads_rejected: u64,
    /// Time since the stats were created
    pub uptime: Duration,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            evicted_connections: AtomicU64::new(0),
            events_broadcast: AtomicU64::new(0),
            payload_bytes_broadcast: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            uploads_accepted: AtomicU64::new(0),
            uploads_rejected: AtomicU64::new(0),
        }
    }

    pub(crate) fn on_connect(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_disconnect(&self, evicted: bool) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        if evicted {
            self.evicted_connections.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn on_delivered(&self, count: usize) {
        self.messages_sent.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn on_broadcast(&self, payload_bytes: usize) {
        self.events_broadcast.fetch_add(1, Ordering::Relaxed);
        self.payload_bytes_broadcast
            .fetch_add(payload_bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn on_upload(&self, accepted: bool) {
        if accepted {
            self.uploads_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.uploads_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            evicted_connections: self.evicted_connections.load(Ordering::Relaxed),
            events_broadcast: self.events_broadcast.load(Ordering::Relaxed),
            payload_bytes_broadcast: self.payload_bytes_broadcast.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            uploads_accepted: self.uploads_accepted.load(Ordering::Relaxed),
            uploads_rejected: self.uploads_rejected.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}
