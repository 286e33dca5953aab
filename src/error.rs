//! Error types
//!
//! One crate-wide [`Error`] with a variant per failure class. Transport
//! failures drop a connection (server) or trigger a reconnect (client);
//! malformed units are skipped; none of them stop the registry or the
//! supervisor.

use thiserror::Error;

use crate::protocol::message::EventKind;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum Error {
    /// Socket level I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket send/receive failure
    #[error("transport failure: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer or the local outbound queue went away
    #[error("channel closed")]
    ChannelClosed,

    /// A structured message could not be understood
    #[error("malformed message: {0}")]
    Malformed(#[from] ProtocolError),

    /// JSON encode/decode failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reassembly ended before `content_length` bytes arrived
    #[error("size mismatch: expected {expected} bytes, received {received}")]
    SizeMismatch { expected: u64, received: u64 },

    /// Payload kind could not be classified
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Producer upload rejected by validation
    #[error("upload rejected: {0}")]
    Ingest(#[from] IngestError),

    /// An operation exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(&'static str),

    /// No duplex channel is currently established
    #[error("not connected")]
    NotConnected,
}

/// Wire-level decode failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Message has no `type` field
    #[error("missing message type")]
    MissingType,

    /// `type` field does not name a known message
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// `type` names an unknown event kind
    #[error("unknown event kind: {0}")]
    UnknownKind(String),

    /// Unknown `encoding` tag
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),
}

/// Reasons a producer upload never enters the broadcast protocol
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    /// Binary payload arrived with no preceding metadata message
    #[error("payload received without metadata")]
    MissingMeta,

    /// Zero-length payload
    #[error("empty payload")]
    EmptyPayload,

    /// Payload exceeds the per-kind limit
    #[error("{kind} payload of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        kind: EventKind,
        size: usize,
        limit: usize,
    },

    /// Declared content type is not accepted for the kind
    #[error("content type {content_type:?} not allowed for {kind}")]
    ContentTypeNotAllowed {
        kind: EventKind,
        content_type: String,
    },

    /// Leading bytes do not look like the declared kind
    #[error("payload signature does not match {0}")]
    SignatureMismatch(EventKind),

    /// Supplied filename classifies as a different kind
    #[error("filename {filename:?} is not a {kind}")]
    FilenameMismatch { kind: EventKind, filename: String },
}

impl IngestError {
    /// Short machine-readable code sent back to the producer
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::MissingMeta => "MISSING_META",
            IngestError::EmptyPayload => "EMPTY_PAYLOAD",
            IngestError::TooLarge { .. } => "TOO_LARGE",
            IngestError::ContentTypeNotAllowed { .. } => "UNSUPPORTED_FORMAT",
            IngestError::SignatureMismatch(_) => "UNSUPPORTED_FORMAT",
            IngestError::FilenameMismatch { .. } => "UNSUPPORTED_FORMAT",
        }
    }
}
