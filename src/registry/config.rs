//! Registry configuration

use std::time::Duration;

/// Configuration for the connection registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Messages queued per connection before a send has to wait
    pub outbound_capacity: usize,

    /// How long one per-connection send may wait for queue space before
    /// the connection is treated as hung and evicted
    pub send_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 64,
            send_timeout: Duration::from_secs(10),
        }
    }
}

impl RegistryConfig {
    /// Set the per-connection queue capacity (minimum 1)
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    /// Set the per-connection send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}
