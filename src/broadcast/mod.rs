//! Server-side event broadcast
//!
//! Encodes events into the start / data / end message sequence and fans it
//! out through the connection registry.

pub mod encoder;

pub use encoder::{encode_segments, split_frames, BroadcastReport, BroadcastRequest, EventEncoder};
