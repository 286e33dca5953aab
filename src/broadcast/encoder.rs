//! Event encoder
//!
//! Turns one payload plus its display metadata into the three-phase message
//! sequence (start, data, end) and drives the registry to fan each message
//! out. Both wire variants share the start and end messages; they differ
//! only in how the payload travels:
//!
//! - `bin`: raw binary frames of `frame_size` bytes, correlated with the
//!   preceding start purely by order
//! - `b64`: the payload's base64 text split into `segment_len` character
//!   segments, each wrapped in a `<kind>_chunk_b64` message

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::constants::{B64_SEGMENT_LEN, DEFAULT_DISPLAY_TIME, FRAME_SIZE};
use crate::protocol::{unix_time_ms, Chunk, Encoding, EventEnd, EventHeader, EventKind, WireMessage};
use crate::registry::{ConnectionId, ConnectionRegistry};

/// One event to broadcast
#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub kind: EventKind,
    pub username: String,
    /// On-screen duration in seconds; values ≤ 0 fall back to the default
    pub display_time: f64,
    pub display_text: String,
    pub content_type: String,
    pub payload: Bytes,
    pub start_after_ms: u64,
    /// Generated when not supplied
    pub event_id: Option<String>,
}

impl BroadcastRequest {
    /// Create a request with the kind's default start delay
    pub fn new(kind: EventKind, content_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            username: String::new(),
            display_time: DEFAULT_DISPLAY_TIME,
            display_text: String::new(),
            content_type: content_type.into(),
            payload: payload.into(),
            start_after_ms: kind.default_start_after_ms(),
            event_id: None,
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

    pub fn start_after_ms(mut self, ms: u64) -> Self {
        self.start_after_ms = ms;
        self
    }

    pub fn event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    fn header(&self, event_id: String, encoding: Encoding) -> EventHeader {
        let display_time = if self.display_time.is_finite() && self.display_time > 0.0 {
            self.display_time
        } else {
            DEFAULT_DISPLAY_TIME
        };

        EventHeader {
            event_id,
            username: self.username.clone(),
            display_time,
            display_text: self.display_text.clone(),
            content_type: self.content_type.clone(),
            content_length: self.payload.len() as u64,
            start_after_ms: self.start_after_ms,
            server_ts_ms: unix_time_ms(),
            encoding,
        }
    }
}

/// Summary of one completed broadcast cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub event_id: String,
    pub kind: EventKind,
    pub encoding: Encoding,
    pub username: String,
    pub content_type: String,
    /// Decoded payload size
    pub payload_bytes: usize,
    /// Binary frames or chunk messages sent between start and end
    pub data_messages: usize,
    /// Live receivers after the cycle
    pub receivers: usize,
}

/// Split a payload into binary frames of at most `frame_size` bytes
///
/// Frames share the payload's allocation.
pub fn split_frames(payload: &Bytes, frame_size: usize) -> Vec<Bytes> {
    let frame_size = frame_size.max(1);
    (0..payload.len())
        .step_by(frame_size)
        .map(|offset| payload.slice(offset..(offset + frame_size).min(payload.len())))
        .collect()
}

/// Base64-encode a payload and split the text into segments
///
/// `segment_len` is rounded down to a multiple of four so every segment
/// decodes on its own.
pub fn encode_segments(payload: &[u8], segment_len: usize) -> Vec<String> {
    let segment_len = aligned_segment_len(segment_len);
    let encoded = STANDARD.encode(payload);

    // Base64 output is ASCII, so byte offsets are char boundaries
    (0..encoded.len())
        .step_by(segment_len)
        .map(|offset| encoded[offset..(offset + segment_len).min(encoded.len())].to_string())
        .collect()
}

fn aligned_segment_len(segment_len: usize) -> usize {
    (segment_len / 4 * 4).max(4)
}

/// Broadcasts events through a [`ConnectionRegistry`]
pub struct EventEncoder {
    registry: Arc<ConnectionRegistry>,
    frame_size: usize,
    segment_len: usize,
    /// Held for a whole start..end cycle so two events never interleave
    cycle: Mutex<()>,
}

impl EventEncoder {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            frame_size: FRAME_SIZE,
            segment_len: B64_SEGMENT_LEN,
            cycle: Mutex::new(()),
        }
    }

    /// Set the binary frame size
    pub fn frame_size(mut self, size: usize) -> Self {
        self.frame_size = size.max(1);
        self
    }

    /// Set the base64 segment length (rounded down to a multiple of four)
    pub fn segment_len(mut self, len: usize) -> Self {
        self.segment_len = aligned_segment_len(len);
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Broadcast one event to every registered connection except `exclude`
    ///
    /// Per-connection failures are handled by the registry (the connection
    /// is dropped); the cycle itself only fails if a message cannot be
    /// serialized.
    pub async fn broadcast(
        &self,
        request: BroadcastRequest,
        encoding: Encoding,
        exclude: &[ConnectionId],
    ) -> Result<BroadcastReport> {
        let _cycle = self.cycle.lock().await;

        let kind = request.kind;
        let event_id = request
            .event_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let header = request.header(event_id.clone(), encoding);

        let start = WireMessage::Start(kind, header).to_json()?;
        self.registry.broadcast_text(start, exclude).await;

        let data_messages = match encoding {
            Encoding::Bin => {
                let frames = split_frames(&request.payload, self.frame_size);
                for frame in &frames {
                    self.registry.broadcast_binary(frame.clone(), exclude).await;
                }
                frames.len()
            }
            Encoding::B64 => {
                let segments = encode_segments(&request.payload, self.segment_len);
                let count = segments.len();
                for b64 in segments {
                    let chunk = WireMessage::ChunkB64(
                        kind,
                        Chunk {
                            event_id: event_id.clone(),
                            b64,
                        },
                    )
                    .to_json()?;
                    self.registry.broadcast_text(chunk, exclude).await;
                }
                count
            }
        };

        let end = WireMessage::End(
            kind,
            EventEnd {
                event_id: event_id.clone(),
            },
        )
        .to_json()?;
        self.registry.broadcast_text(end, exclude).await;

        let receivers = self.registry.count(exclude).await;
        self.registry.stats().on_broadcast(request.payload.len());

        tracing::info!(
            event_id = %event_id,
            kind = %kind,
            encoding = %encoding,
            bytes = request.payload.len(),
            username = %request.username,
            receivers = receivers,
            "Event broadcast"
        );

        Ok(BroadcastReport {
            event_id,
            kind,
            encoding,
            username: request.username,
            content_type: request.content_type,
            payload_bytes: request.payload.len(),
            data_messages,
            receivers,
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::protocol::MessageType;
    use crate::registry::Outbound;

    fn payload(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn text_type(msg: &Outbound) -> Option<MessageType> {
        match msg {
            Outbound::Text(text) => Some(WireMessage::parse(text).unwrap().message_type()),
            Outbound::Binary(_) => None,
        }
    }

    #[test]
    fn test_split_frames_round_trip() {
        for (size, frame) in [(0, 4), (1, 4), (4, 4), (5, 4), (1000, 64), (1000, 1)] {
            let data = payload(size);
            let frames = split_frames(&data, frame);
            assert_eq!(frames.len(), size.div_ceil(frame));
            assert!(frames.iter().all(|f| f.len() <= frame));
            assert_eq!(frames.concat(), data.to_vec());
        }
    }

    #[test]
    fn test_encode_segments_round_trip() {
        for size in [0, 1, 2, 3, 100, 4097] {
            let data = payload(size);
            let segments = encode_segments(&data, 16);
            let decoded = STANDARD.decode(segments.concat()).unwrap();
            assert_eq!(decoded, data.to_vec());

            // Each segment must also decode on its own
            let piecewise: Vec<u8> = segments
                .iter()
                .flat_map(|s| STANDARD.decode(s).unwrap())
                .collect();
            assert_eq!(piecewise, data.to_vec());
        }
    }

    #[test]
    fn test_segment_len_aligned() {
        assert_eq!(aligned_segment_len(60_000), 60_000);
        assert_eq!(aligned_segment_len(10), 8);
        assert_eq!(aligned_segment_len(0), 4);
    }

    #[test]
    fn test_segment_count_for_300k_image() {
        let segments = encode_segments(&payload(300_000), B64_SEGMENT_LEN);
        // 300000 bytes -> 400000 base64 characters
        assert_eq!(segments.iter().map(String::len).sum::<usize>(), 400_000);
        assert_eq!(segments.len(), 400_000usize.div_ceil(B64_SEGMENT_LEN));
    }

    #[tokio::test]
    async fn test_bin_sequence() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (handle, mut rx) = registry.open_handle(None);
        registry.add(handle).await;

        let encoder = EventEncoder::new(Arc::clone(&registry)).frame_size(10);
        let data = payload(25);
        let report = encoder
            .broadcast(
                BroadcastRequest::new(EventKind::Video, "video/mp4", data.clone()),
                Encoding::Bin,
                &[],
            )
            .await
            .unwrap();

        assert_eq!(report.data_messages, 3);
        assert_eq!(report.receivers, 1);

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 5);
        assert_eq!(text_type(&messages[0]), Some(MessageType::Start(EventKind::Video)));
        let frames: Vec<u8> = messages[1..4]
            .iter()
            .flat_map(|m| match m {
                Outbound::Binary(b) => b.to_vec(),
                Outbound::Text(_) => panic!("expected binary frame"),
            })
            .collect();
        assert_eq!(frames, data.to_vec());
        assert_eq!(text_type(&messages[4]), Some(MessageType::End(EventKind::Video)));
    }

    #[tokio::test]
    async fn test_b64_sequence() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (handle, mut rx) = registry.open_handle(None);
        registry.add(handle).await;

        let encoder = EventEncoder::new(Arc::clone(&registry)).segment_len(8);
        let report = encoder
            .broadcast(
                BroadcastRequest::new(EventKind::Image, "image/png", payload(12))
                    .event_id("fixed")
                    .display_time(-1.0),
                Encoding::B64,
                &[],
            )
            .await
            .unwrap();

        // 12 bytes -> 16 base64 chars -> two 8-char segments
        assert_eq!(report.data_messages, 2);
        assert_eq!(report.event_id, "fixed");

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 4);
        assert!(messages.iter().all(|m| matches!(m, Outbound::Text(_))));

        let Outbound::Text(start) = &messages[0] else {
            unreachable!()
        };
        let WireMessage::Start(_, header) = WireMessage::parse(start).unwrap() else {
            panic!("expected start");
        };
        assert_eq!(header.encoding, Encoding::B64);
        assert_eq!(header.content_length, 12);
        assert_eq!(header.display_time, DEFAULT_DISPLAY_TIME);
        assert_eq!(header.start_after_ms, EventKind::Image.default_start_after_ms());
        assert!(header.server_ts_ms > 0);

        for msg in &messages[1..3] {
            let Outbound::Text(text) = msg else {
                unreachable!()
            };
            match WireMessage::parse(text).unwrap() {
                WireMessage::ChunkB64(EventKind::Image, chunk) => {
                    assert_eq!(chunk.event_id, "fixed");
                    assert_eq!(chunk.b64.len(), 8);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_exclude_producer() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (producer, mut producer_rx) = registry.open_handle(None);
        let (viewer, mut viewer_rx) = registry.open_handle(None);
        let producer_id = producer.id;
        registry.add(producer).await;
        registry.add(viewer).await;

        let encoder = EventEncoder::new(Arc::clone(&registry));
        let report = encoder
            .broadcast(
                BroadcastRequest::new(EventKind::Audio, "audio/ogg", payload(3)),
                Encoding::Bin,
                &[producer_id],
            )
            .await
            .unwrap();

        assert_eq!(report.receivers, 1);
        assert!(drain(&mut producer_rx).is_empty());
        assert_eq!(drain(&mut viewer_rx).len(), 3);
        assert_eq!(registry.stats().snapshot().events_broadcast, 1);
    }

    #[tokio::test]
    async fn test_concurrent_cycles_do_not_interleave() {
        let registry = Arc::new(ConnectionRegistry::with_config(
            crate::registry::RegistryConfig::default().outbound_capacity(256),
        ));
        let (viewer, mut rx) = registry.open_handle(None);
        registry.add(viewer).await;

        let encoder = Arc::new(EventEncoder::new(Arc::clone(&registry)).segment_len(4));
        let a = {
            let encoder = Arc::clone(&encoder);
            tokio::spawn(async move {
                encoder
                    .broadcast(
                        BroadcastRequest::new(EventKind::Image, "image/png", payload(30)).event_id("a"),
                        Encoding::B64,
                        &[],
                    )
                    .await
            })
        };
        let b = {
            let encoder = Arc::clone(&encoder);
            tokio::spawn(async move {
                encoder
                    .broadcast(
                        BroadcastRequest::new(EventKind::Image, "image/png", payload(30)).event_id("b"),
                        Encoding::B64,
                        &[],
                    )
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let ids: Vec<String> = drain(&mut rx)
            .iter()
            .map(|m| match m {
                Outbound::Text(text) => WireMessage::parse(text)
                    .unwrap()
                    .event_id()
                    .unwrap_or_default()
                    .to_string(),
                Outbound::Binary(_) => panic!("unexpected binary"),
            })
            .collect();

        // All of one event's messages, then all of the other's
        let switches = ids.windows(2).filter(|w| w[0] != w[1]).count();
        assert_eq!(switches, 1);
    }
}
