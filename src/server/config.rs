//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::constants::*;
use crate::protocol::{Encoding, EventKind};
use crate::registry::RegistryConfig;

/// One value per [`EventKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerKind<T> {
    pub image: T,
    pub video: T,
    pub audio: T,
}

impl<T: Copy> PerKind<T> {
    pub fn get(&self, kind: EventKind) -> T {
        match kind {
            EventKind::Image => self.image,
            EventKind::Video => self.video,
            EventKind::Audio => self.audio,
        }
    }

    pub fn set(&mut self, kind: EventKind, value: T) {
        match kind {
            EventKind::Image => self.image = value,
            EventKind::Video => self.video = value,
            EventKind::Audio => self.audio = value,
        }
    }
}

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Wire encoding used for every broadcast
    pub encoding: Encoding,

    /// Raw frame size for the `bin` encoding
    pub frame_size: usize,

    /// Base64 text per chunk message for the `b64` encoding
    pub segment_len: usize,

    /// WebSocket upgrade must complete within this time
    pub handshake_timeout: Duration,

    /// Per-connection send timeout before a connection is evicted
    pub send_timeout: Duration,

    /// Messages queued per connection
    pub outbound_capacity: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Display time applied when an upload carries none (seconds)
    pub default_display_time: f64,

    /// Start delay announced for each kind of upload
    pub start_after_ms: PerKind<u64>,

    /// Upload size limit per kind
    pub max_bytes: PerKind<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8765)),
            max_connections: 0, // Unlimited
            encoding: Encoding::B64,
            frame_size: FRAME_SIZE,
            segment_len: B64_SEGMENT_LEN,
            handshake_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            outbound_capacity: 64,
            tcp_nodelay: true,
            default_display_time: DEFAULT_DISPLAY_TIME,
            start_after_ms: PerKind {
                image: START_AFTER_IMAGE_MS,
                video: START_AFTER_VIDEO_MS,
                audio: START_AFTER_AUDIO_MS,
            },
            max_bytes: PerKind {
                image: MAX_IMAGE_BYTES,
                video: MAX_VIDEO_BYTES,
                audio: MAX_AUDIO_BYTES,
            },
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the broadcast encoding
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the binary frame size (minimum 1)
    pub fn frame_size(mut self, size: usize) -> Self {
        self.frame_size = size.max(1);
        self
    }

    /// Set the base64 segment length
    pub fn segment_len(mut self, len: usize) -> Self {
        self.segment_len = len;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the per-connection queue capacity (minimum 1)
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    /// Override the start delay for one kind
    pub fn start_after(mut self, kind: EventKind, ms: u64) -> Self {
        self.start_after_ms.set(kind, ms);
        self
    }

    /// Override the upload limit for one kind
    pub fn max_bytes(mut self, kind: EventKind, bytes: usize) -> Self {
        self.max_bytes.set(kind, bytes);
        self
    }

    /// Registry settings derived from this config
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::default()
            .outbound_capacity(self.outbound_capacity)
            .send_timeout(self.send_timeout)
    }
}
