//! Relay server
//!
//! Accepts viewer and producer connections on one WebSocket endpoint,
//! validates and stores producer uploads, and broadcasts them to every
//! other connection through the [`EventEncoder`](crate::broadcast::EventEncoder).

pub mod config;
pub(crate) mod ingest;
pub mod listener;

pub use config::{PerKind, ServerConfig};
pub use listener::MediaServer;
