//! livecast: synchronised media events over WebSocket
//!
//! A relay server accepts image, video and audio uploads from producers
//! and broadcasts each one to every other connected viewer as a three-phase
//! message sequence (start, data, end). Viewers reassemble the payload and
//! present it at a shared offset from the moment its start message arrived,
//! so everyone sees the event at roughly the same time.
//!
//! ```text
//!   producer ──meta+binary──► MediaServer ──► EventEncoder ──► ConnectionRegistry
//!                                  │                                 │
//!                              BlobStore                 start / data / end
//!                                                                    ▼
//!                        Renderer ◄── PlaybackScheduler ◄── Reassembler (viewer)
//! ```
//!
//! Two wire encodings carry the payload: `bin` (raw binary frames) and
//! `b64` (base64 text chunks). Both share the same start and end messages.

pub mod broadcast;
pub mod client;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod stats;

pub use broadcast::{BroadcastReport, BroadcastRequest, EventEncoder};
pub use client::{ClientConfig, ClientEvent, ConnectionSupervisor, Renderer, SupervisorHandle};
pub use error::{Error, Result};
pub use protocol::{Encoding, EventKind};
pub use server::{MediaServer, ServerConfig};
