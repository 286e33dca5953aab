//! Viewer client
//!
//! Provides the receiving side of the relay:
//! - Reassembly of events from either wire encoding
//! - Playback scheduling against the local monotonic clock
//! - A reconnecting connection supervisor that can also upload media
//! - The persisted viewer profile

pub mod config;
pub mod profile;
pub mod reassembly;
pub mod scheduler;
pub mod supervisor;

pub use config::ClientConfig;
pub use profile::Profile;
pub use reassembly::{CompletedEvent, Decoded, ReassemblyState, Reassembler};
pub use scheduler::{PlaybackScheduler, Presentation, Renderer};
pub use supervisor::{ClientEvent, ConnectionSupervisor, SupervisorHandle};
