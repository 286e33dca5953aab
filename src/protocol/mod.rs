//! Event broadcast wire protocol
//!
//! - Constants shared by server and viewer (frame sizes, limits, delays)
//! - Structured message types and their JSON encoding

pub mod constants;
pub mod message;

pub use message::{
    Ack, Chunk, Encoding, ErrorReport, EventEnd, EventHeader, EventKind, MediaMeta, MessageType,
    WireMessage,
};

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch
pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
