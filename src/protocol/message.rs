//! Wire messages
//!
//! Every structured message is a JSON object whose `type` field carries both
//! the event kind and the phase, e.g. `"video_start"`, `"audio_chunk_b64"`,
//! `"image_end"`. Raw binary frames of the `bin` encoding carry no envelope
//! and are therefore not represented here.
//!
//! ```text
//! producer                      server                         viewer
//!    |-- <kind>_meta ------------->|                              |
//!    |-- [binary payload] -------->|-- <kind>_start ------------->|
//!    |                             |-- [binary frame] * n  (bin)  |
//!    |                             |-- <kind>_chunk_b64 * n (b64)>|
//!    |                             |-- <kind>_end --------------->|
//!    |<-- <kind>_ack / error ------|                              |
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{ProtocolError, Result};

use super::constants::*;

/// Media kind of an event, fixed for the event's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Image,
    Video,
    Audio,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Image, EventKind::Video, EventKind::Audio];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Image => "image",
            EventKind::Video => "video",
            EventKind::Audio => "audio",
        }
    }

    /// Default start delay announced for this kind
    pub fn default_start_after_ms(&self) -> u64 {
        match self {
            EventKind::Image => START_AFTER_IMAGE_MS,
            EventKind::Video => START_AFTER_VIDEO_MS,
            EventKind::Audio => START_AFTER_AUDIO_MS,
        }
    }

    /// Default upload size limit for this kind
    pub fn default_max_bytes(&self) -> usize {
        match self {
            EventKind::Image => MAX_IMAGE_BYTES,
            EventKind::Video => MAX_VIDEO_BYTES,
            EventKind::Audio => MAX_AUDIO_BYTES,
        }
    }

    /// Content types a producer may declare for this kind
    pub fn allowed_content_types(&self) -> &'static [&'static str] {
        match self {
            EventKind::Image => ALLOWED_IMAGE_MIME,
            EventKind::Video => ALLOWED_VIDEO_MIME,
            EventKind::Audio => ALLOWED_AUDIO_MIME,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "image" => Ok(EventKind::Image),
            "video" => Ok(EventKind::Video),
            "audio" => Ok(EventKind::Audio),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

/// Wire variant used for the payload of one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Raw binary frames following the start message
    #[default]
    Bin,
    /// Base64 text carried in `*_chunk_b64` messages
    B64,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Bin => f.write_str("bin"),
            Encoding::B64 => f.write_str("b64"),
        }
    }
}

impl FromStr for Encoding {
    type Err = ProtocolError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "bin" => Ok(Encoding::Bin),
            "b64" => Ok(Encoding::B64),
            other => Err(ProtocolError::UnknownEncoding(other.to_string())),
        }
    }
}

/// Value of the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Start(EventKind),
    ChunkB64(EventKind),
    End(EventKind),
    Ack(EventKind),
    Meta(EventKind),
    Error,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Start(kind) => write!(f, "{}_start", kind),
            MessageType::ChunkB64(kind) => write!(f, "{}_chunk_b64", kind),
            MessageType::End(kind) => write!(f, "{}_end", kind),
            MessageType::Ack(kind) => write!(f, "{}_ack", kind),
            MessageType::Meta(kind) => write!(f, "{}_meta", kind),
            MessageType::Error => f.write_str("error"),
        }
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == "error" {
            return Ok(MessageType::Error);
        }

        let (kind, phase) = s
            .split_once('_')
            .ok_or_else(|| ProtocolError::UnknownType(s.to_string()))?;
        let kind: EventKind = kind.parse()?;

        match phase {
            "start" => Ok(MessageType::Start(kind)),
            "chunk_b64" => Ok(MessageType::ChunkB64(kind)),
            "end" => Ok(MessageType::End(kind)),
            "ack" => Ok(MessageType::Ack(kind)),
            "meta" => Ok(MessageType::Meta(kind)),
            _ => Err(ProtocolError::UnknownType(s.to_string())),
        }
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn default_display_time() -> f64 {
    DEFAULT_DISPLAY_TIME
}

fn default_start_after_ms() -> u64 {
    DEFAULT_START_AFTER_MS
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

/// Body of a `<kind>_start` message: everything a viewer needs to
/// reassemble and schedule one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHeader {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub username: String,
    /// Requested on-screen duration in seconds
    #[serde(default = "default_display_time")]
    pub display_time: f64,
    #[serde(default)]
    pub display_text: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Exact byte length of the decoded payload
    #[serde(default)]
    pub content_length: u64,
    /// Delay measured from local receipt of the start message
    #[serde(default = "default_start_after_ms")]
    pub start_after_ms: u64,
    /// Server wall clock when the start message was produced
    #[serde(default)]
    pub server_ts_ms: u64,
    #[serde(default)]
    pub encoding: Encoding,
}

/// Body of a `<kind>_chunk_b64` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub b64: String,
}

/// Body of a `<kind>_end` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnd {
    #[serde(default)]
    pub event_id: String,
}

/// Body of a `<kind>_ack` message sent back to a producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub content_type: String,
}

/// Body of an `error` message sent back to a producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(default)]
    pub error: String,
}

/// Body of a `<kind>_meta` message announcing a producer upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaMeta {
    #[serde(default)]
    pub username: String,
    /// Values ≤ 0 are replaced by the server default
    #[serde(default)]
    pub display_time: f64,
    #[serde(default)]
    pub display_text: String,
    #[serde(default)]
    pub content_type: String,
    /// Original file name, used for the stored blob name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl MediaMeta {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            username: String::new(),
            display_time: 0.0,
            display_text: String::new(),
            content_type: content_type.into(),
            filename: None,
        }
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn display_time(mut self, seconds: f64) -> Self {
        self.display_time = seconds;
        self
    }

    pub fn display_text(mut self, text: impl Into<String>) -> Self {
        self.display_text = text.into();
        self
    }

    pub fn filename(mut self, name: impl Into<String>) -> Self {
        self.filename = Some(name.into());
        self
    }
}

/// Any structured (text) message of the protocol
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Start(EventKind, EventHeader),
    ChunkB64(EventKind, Chunk),
    End(EventKind, EventEnd),
    Ack(EventKind, Ack),
    Meta(EventKind, MediaMeta),
    Error(ErrorReport),
}

#[derive(Serialize)]
struct Tagged<'a, T> {
    #[serde(rename = "type")]
    msg_type: MessageType,
    #[serde(flatten)]
    body: &'a T,
}

fn tagged<T: Serialize>(msg_type: MessageType, body: &T) -> Result<String> {
    Ok(serde_json::to_string(&Tagged { msg_type, body })?)
}

impl WireMessage {
    pub fn error(message: impl Into<String>) -> Self {
        WireMessage::Error(ErrorReport {
            error: message.into(),
        })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            WireMessage::Start(kind, _) => MessageType::Start(*kind),
            WireMessage::ChunkB64(kind, _) => MessageType::ChunkB64(*kind),
            WireMessage::End(kind, _) => MessageType::End(*kind),
            WireMessage::Ack(kind, _) => MessageType::Ack(*kind),
            WireMessage::Meta(kind, _) => MessageType::Meta(*kind),
            WireMessage::Error(_) => MessageType::Error,
        }
    }

    /// Event this message belongs to, for the start/chunk/end phases
    pub fn event_id(&self) -> Option<&str> {
        match self {
            WireMessage::Start(_, header) => Some(&header.event_id),
            WireMessage::ChunkB64(_, chunk) => Some(&chunk.event_id),
            WireMessage::End(_, end) => Some(&end.event_id),
            _ => None,
        }
    }

    /// Serialize to the JSON text sent on the wire
    pub fn to_json(&self) -> Result<String> {
        let msg_type = self.message_type();
        match self {
            WireMessage::Start(_, header) => tagged(msg_type, header),
            WireMessage::ChunkB64(_, chunk) => tagged(msg_type, chunk),
            WireMessage::End(_, end) => tagged(msg_type, end),
            WireMessage::Ack(_, ack) => tagged(msg_type, ack),
            WireMessage::Meta(_, meta) => tagged(msg_type, meta),
            WireMessage::Error(report) => tagged(msg_type, report),
        }
    }

    /// Parse a JSON text message
    pub fn parse(text: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(text)?;

        let msg_type: MessageType = match value.get("type").and_then(Value::as_str) {
            Some(t) => t.parse()?,
            None => return Err(ProtocolError::MissingType.into()),
        };
        if let Some(object) = value.as_object_mut() {
            object.remove("type");
        }

        let message = match msg_type {
            MessageType::Start(kind) => WireMessage::Start(kind, serde_json::from_value(value)?),
            MessageType::ChunkB64(kind) => {
                WireMessage::ChunkB64(kind, serde_json::from_value(value)?)
            }
            MessageType::End(kind) => WireMessage::End(kind, serde_json::from_value(value)?),
            MessageType::Ack(kind) => WireMessage::Ack(kind, serde_json::from_value(value)?),
            MessageType::Meta(kind) => WireMessage::Meta(kind, serde_json::from_value(value)?),
            MessageType::Error => WireMessage::Error(serde_json::from_value(value)?),
        };

        Ok(message)
    }
}
