//! Viewer client configuration

use std::time::Duration;

/// Connection supervisor configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay endpoint, e.g. `ws://127.0.0.1:8765`
    pub url: String,

    /// How long one connection attempt may take
    pub connect_timeout: Duration,

    /// Keepalive ping interval while connected
    pub ping_interval: Duration,

    /// Pause between a disconnect and the next attempt
    pub reconnect_backoff: Duration,

    /// Capacity of the [`ClientEvent`](super::ClientEvent) channel
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765".to_string(),
            connect_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(20),
            reconnect_backoff: Duration::from_secs(2),
            event_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Create a config for the given relay URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Set the event channel capacity (minimum 1)
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
