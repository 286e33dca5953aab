//! Protocol constants

/// Size of one raw binary frame in the `bin` encoding
pub const FRAME_SIZE: usize = 64 * 1024;

/// Maximum length of the base64 text carried by one `*_chunk_b64` message
/// (~45 KB of raw payload)
pub const B64_SEGMENT_LEN: usize = 60_000;

/// Per-kind upload limits
pub const MAX_IMAGE_BYTES: usize = 1_500_000;
pub const MAX_VIDEO_BYTES: usize = 20_000_000;
pub const MAX_AUDIO_BYTES: usize = 10_000_000;

/// Per-kind start delays announced to viewers
pub const START_AFTER_IMAGE_MS: u64 = 1200;
pub const START_AFTER_VIDEO_MS: u64 = 3000;
pub const START_AFTER_AUDIO_MS: u64 = 1500;

/// Start delay assumed when a start message omits `start_after_ms`
pub const DEFAULT_START_AFTER_MS: u64 = 1000;

/// On-screen duration used when the producer supplies none (or ≤ 0)
pub const DEFAULT_DISPLAY_TIME: f64 = 3.0;

/// Accepted content types
pub const ALLOWED_IMAGE_MIME: &[&str] = &["image/jpeg", "image/png", "image/gif"];
pub const ALLOWED_VIDEO_MIME: &[&str] = &["video/mp4"];
pub const ALLOWED_AUDIO_MIME: &[&str] = &["audio/mpeg", "audio/wav", "audio/ogg", "audio/mp4"];

/// Longest username kept in a viewer profile
pub const MAX_USERNAME_CHARS: usize = 32;
