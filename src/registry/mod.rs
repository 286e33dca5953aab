//! Connection registry for event fan-out
//!
//! The registry tracks every reachable viewer connection and delivers each
//! protocol message to all of them concurrently.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<ConnectionRegistry>
//!                  ┌──────────────────────────────┐
//!                  │ connections: HashMap<Id,     │
//!                  │   ConnectionHandle {         │
//!                  │     tx: mpsc::Sender,        │
//!                  │   }                          │
//!                  │ >                            │
//!                  └──────────────┬───────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         ▼                       ▼                       ▼
//!   [writer task]           [writer task]           [writer task]
//!   rx.recv()               rx.recv()               rx.recv()
//!         │                       │                       │
//!         └──► ws.send() ──► TCP  └──► ws.send()          └──► ...
//! ```
//!
//! A send that fails (writer gone) or times out (queue full for longer than
//! the send timeout) evicts that connection only; delivery to the others
//! proceeds.
//!
//! # Zero-Copy Design
//!
//! Binary frames are `bytes::Bytes` and text messages `Arc<str>`, so every
//! connection's queue shares the same allocation.

pub mod config;
pub mod entry;
pub mod error;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{ConnectionHandle, ConnectionId, Outbound};
pub use error::RegistryError;
pub use store::ConnectionRegistry;
