//! Event reassembly
//!
//! Per-connection state machine that rebuilds event payloads from the
//! message sequence, whichever wire variant carried them.
//!
//! ```text
//!            start                       bytes >= content_length
//!   Idle ───────────────► Accumulating ──────────────────────────► Complete
//!    ▲                     │  ▲    │            or end                │
//!    │                     │  └────┘                                  │
//!    │                     │  binary frame / chunk_b64 (same id)      │
//!    └─────────────────────┴──────────────────────────────────────────┘
//!           reset (disconnect)            handed to the scheduler
//! ```
//!
//! Policies:
//! - a start while accumulating discards the incomplete event (last wins)
//! - an undecodable base64 segment is skipped and counted, the event goes on
//! - chunk/end messages for another event id are ignored
//! - an end before `content_length` bytes arrived hands off what was received;
//!   only a disconnect or a superseding start discards a partial event
//! - binary frames while idle, or for a base64 event, are dropped

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use tokio::time::Instant;

use crate::error::Error;
use crate::protocol::{Ack, Encoding, EventHeader, EventKind, WireMessage};

/// A fully reassembled event, ready for scheduling
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedEvent {
    pub kind: EventKind,
    pub header: EventHeader,
    /// At most `header.content_length` bytes; fewer only when the event
    /// ended short
    pub payload: Bytes,
    /// Local time the start message was received
    pub received_at: Instant,
}

/// Outcome of feeding one message to the [`Reassembler`]
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// An event finished reassembling
    Completed(CompletedEvent),
    /// The server accepted one of our uploads
    Acknowledged { kind: EventKind, ack: Ack },
    /// The server reported a failure for one of our uploads
    ServerError(String),
}

/// Observable reassembly state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    Idle,
    Accumulating,
}

#[derive(Debug)]
struct PendingEvent {
    kind: EventKind,
    header: EventHeader,
    buffer: BytesMut,
    received_at: Instant,
}

impl PendingEvent {
    fn is_complete(&self) -> bool {
        self.buffer.len() as u64 >= self.header.content_length
    }
}

/// Single-slot reassembly buffer for one connection
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: Option<PendingEvent>,
    skipped_segments: u64,
    discarded_events: u64,
    completed_events: u64,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ReassemblyState {
        if self.pending.is_some() {
            ReassemblyState::Accumulating
        } else {
            ReassemblyState::Idle
        }
    }

    /// Event currently being accumulated
    pub fn pending_event_id(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.header.event_id.as_str())
    }

    /// Decoded bytes accumulated for the pending event
    pub fn received_bytes(&self) -> usize {
        self.pending.as_ref().map_or(0, |p| p.buffer.len())
    }

    /// Base64 segments that failed to decode and were skipped
    pub fn skipped_segments(&self) -> u64 {
        self.skipped_segments
    }

    /// Events dropped before completion (superseded or reset)
    pub fn discarded_events(&self) -> u64 {
        self.discarded_events
    }

    pub fn completed_events(&self) -> u64 {
        self.completed_events
    }

    /// Discard any pending event, e.g. when the connection drops
    pub fn reset(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.discarded_events += 1;
            tracing::debug!(
                event_id = %pending.header.event_id,
                received = pending.buffer.len(),
                expected = pending.header.content_length,
                "Pending event discarded"
            );
        }
    }

    /// Feed a text message
    pub fn on_text(&mut self, text: &str, now: Instant) -> Option<Decoded> {
        match WireMessage::parse(text) {
            Ok(message) => self.on_message(message, now),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed message");
                None
            }
        }
    }

    /// Feed a parsed structured message
    pub fn on_message(&mut self, message: WireMessage, now: Instant) -> Option<Decoded> {
        match message {
            WireMessage::Start(kind, header) => {
                self.start(kind, header, now);
                // A zero-length event is already complete
                self.complete_if_ready()
            }
            WireMessage::ChunkB64(_, chunk) => {
                let pending = self.pending_for(&chunk.event_id)?;
                if !chunk.b64.is_empty() {
                    match STANDARD.decode(chunk.b64.as_bytes()) {
                        Ok(bytes) => pending.buffer.extend_from_slice(&bytes),
                        Err(e) => {
                            self.skipped_segments += 1;
                            tracing::warn!(
                                event_id = %chunk.event_id,
                                error = %e,
                                "Skipping undecodable base64 segment"
                            );
                        }
                    }
                }
                self.complete_if_ready()
            }
            WireMessage::End(_, end) => {
                self.pending_for(&end.event_id)?;
                self.finish()
            }
            WireMessage::Ack(kind, ack) => Some(Decoded::Acknowledged { kind, ack }),
            WireMessage::Error(report) => Some(Decoded::ServerError(report.error)),
            WireMessage::Meta(kind, _) => {
                tracing::debug!(kind = %kind, "Ignoring upload metadata on viewer channel");
                None
            }
        }
    }

    /// Feed a raw binary frame
    pub fn on_binary(&mut self, data: &[u8]) -> Option<Decoded> {
        match self.pending.as_mut() {
            Some(pending) if pending.header.encoding == Encoding::Bin => {
                pending.buffer.extend_from_slice(data);
                self.complete_if_ready()
            }
            Some(pending) => {
                tracing::debug!(
                    event_id = %pending.header.event_id,
                    bytes = data.len(),
                    "Binary frame for a base64 event, ignoring"
                );
                None
            }
            None => {
                tracing::debug!(bytes = data.len(), "Binary frame with no pending event");
                None
            }
        }
    }

    fn start(&mut self, kind: EventKind, header: EventHeader, now: Instant) {
        if let Some(previous) = self.pending.take() {
            self.discarded_events += 1;
            tracing::warn!(
                previous = %previous.header.event_id,
                next = %header.event_id,
                received = previous.buffer.len(),
                expected = previous.header.content_length,
                "New event started before previous completed, discarding previous"
            );
        }

        tracing::debug!(
            event_id = %header.event_id,
            kind = %kind,
            encoding = %header.encoding,
            content_length = header.content_length,
            "Event started"
        );

        // Cap the up-front reservation; the length is producer supplied
        let capacity = header.content_length.min(crate::protocol::constants::MAX_VIDEO_BYTES as u64);
        self.pending = Some(PendingEvent {
            kind,
            buffer: BytesMut::with_capacity(capacity as usize),
            header,
            received_at: now,
        });
    }

    fn pending_for(&mut self, event_id: &str) -> Option<&mut PendingEvent> {
        match self.pending.as_mut() {
            Some(pending) if pending.header.event_id == event_id => Some(pending),
            Some(pending) => {
                tracing::debug!(
                    pending = %pending.header.event_id,
                    got = %event_id,
                    "Ignoring message for another event"
                );
                None
            }
            None => None,
        }
    }

    fn complete_if_ready(&mut self) -> Option<Decoded> {
        if self.pending.as_ref().is_some_and(PendingEvent::is_complete) {
            self.finish()
        } else {
            None
        }
    }

    fn finish(&mut self) -> Option<Decoded> {
        let mut pending = self.pending.take()?;
        let expected = pending.header.content_length;

        if (pending.buffer.len() as u64) < expected {
            let error = Error::SizeMismatch {
                expected,
                received: pending.buffer.len() as u64,
            };
            tracing::warn!(
                event_id = %pending.header.event_id,
                error = %error,
                "Event ended short, handing off partial payload"
            );
        } else {
            pending.buffer.truncate(expected as usize);
        }
        self.completed_events += 1;

        Some(Decoded::Completed(CompletedEvent {
            kind: pending.kind,
            header: pending.header,
            payload: pending.buffer.freeze(),
            received_at: pending.received_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{encode_segments, split_frames};
    use crate::protocol::{Chunk, EventEnd};

    fn header(event_id: &str, content_length: u64, encoding: Encoding) -> EventHeader {
        EventHeader {
            event_id: event_id.into(),
            username: "u".into(),
            display_time: 3.0,
            display_text: String::new(),
            content_type: "image/png".into(),
            content_length,
            start_after_ms: 1000,
            server_ts_ms: 0,
            encoding,
        }
    }

    fn payload(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i * 7 % 256) as u8).collect::<Vec<u8>>())
    }

    fn start(r: &mut Reassembler, id: &str, len: u64, encoding: Encoding) -> Option<Decoded> {
        r.on_message(
            WireMessage::Start(EventKind::Image, header(id, len, encoding)),
            Instant::now(),
        )
    }

    fn chunk(r: &mut Reassembler, id: &str, b64: &str) -> Option<Decoded> {
        r.on_message(
            WireMessage::ChunkB64(
                EventKind::Image,
                Chunk {
                    event_id: id.into(),
                    b64: b64.into(),
                },
            ),
            Instant::now(),
        )
    }

    fn end(r: &mut Reassembler, id: &str) -> Option<Decoded> {
        r.on_message(
            WireMessage::End(EventKind::Image, EventEnd { event_id: id.into() }),
            Instant::now(),
        )
    }

    fn completed(decoded: Option<Decoded>) -> CompletedEvent {
        match decoded {
            Some(Decoded::Completed(event)) => event,
            other => panic!("expected completed event, got {:?}", other),
        }
    }

    #[test]
    fn test_bin_round_trip() {
        for (size, frame) in [(1, 1), (100, 7), (65_536, 4096), (70_000, 65_536)] {
            let data = payload(size);
            let mut r = Reassembler::new();
            assert!(start(&mut r, "e", size as u64, Encoding::Bin).is_none());
            assert_eq!(r.state(), ReassemblyState::Accumulating);

            let frames = split_frames(&data, frame);
            let (last, rest) = frames.split_last().unwrap();
            for f in rest {
                assert!(r.on_binary(f).is_none());
            }
            let event = completed(r.on_binary(last));

            assert_eq!(event.payload, data);
            assert_eq!(r.state(), ReassemblyState::Idle);
            // The trailing end message is a no-op once complete
            assert!(end(&mut r, "e").is_none());
        }
    }

    #[test]
    fn test_b64_300k_image() {
        let data = payload(300_000);
        let segments = encode_segments(&data, 60_000);
        assert_eq!(segments.len(), 7);

        let mut r = Reassembler::new();
        start(&mut r, "img", 300_000, Encoding::B64);
        let (last, rest) = segments.split_last().unwrap();
        for s in rest {
            assert!(chunk(&mut r, "img", s).is_none());
        }
        let event = completed(chunk(&mut r, "img", last));

        assert_eq!(event.payload.len(), 300_000);
        assert_eq!(event.payload, data);
        assert_eq!(event.header.event_id, "img");
    }

    #[test]
    fn test_b64_tiny_inputs() {
        for size in [0usize, 1, 2] {
            let data = payload(size);
            let mut r = Reassembler::new();
            let mut result = start(&mut r, "t", size as u64, Encoding::B64);
            for s in encode_segments(&data, 8) {
                result = result.or(chunk(&mut r, "t", &s));
            }
            result = result.or(end(&mut r, "t"));
            assert_eq!(completed(result).payload, data);
        }
    }

    #[test]
    fn test_overshoot_completes_and_truncates() {
        let mut r = Reassembler::new();
        start(&mut r, "e", 5, Encoding::Bin);
        assert!(r.on_binary(&[1, 2, 3]).is_none());
        let event = completed(r.on_binary(&[4, 5, 6, 7]));
        assert_eq!(&event.payload[..], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_end_completes_exact_payload() {
        // Zero-length events complete as soon as they start
        let mut r = Reassembler::new();
        let event = completed(start(&mut r, "empty", 0, Encoding::Bin));
        assert!(event.payload.is_empty());
    }

    #[test]
    fn test_skipped_segment_then_end_hands_off() {
        let data = payload(24);
        let segments = encode_segments(&data, 8);
        assert_eq!(segments.len(), 4);

        let mut r = Reassembler::new();
        start(&mut r, "e", 24, Encoding::B64);
        for (i, s) in segments.iter().enumerate() {
            let s = if i == 1 { "!!corrupt" } else { s.as_str() };
            assert!(chunk(&mut r, "e", s).is_none());
        }
        assert_eq!(r.skipped_segments(), 1);

        let event = completed(end(&mut r, "e"));
        let mut expected = data[..6].to_vec();
        expected.extend_from_slice(&data[12..]);
        assert_eq!(event.payload, expected);
        assert_eq!(event.header.content_length, 24);
        assert_eq!(r.state(), ReassemblyState::Idle);
        assert_eq!(r.discarded_events(), 0);
        assert_eq!(r.completed_events(), 1);
    }

    #[test]
    fn test_binary_frames_ignored_for_b64_event() {
        let mut r = Reassembler::new();
        start(&mut r, "e", 4, Encoding::B64);
        assert!(r.on_binary(&[1, 2, 3, 4]).is_none());
        assert_eq!(r.received_bytes(), 0);
        assert_eq!(r.pending_event_id(), Some("e"));

        let event = completed(chunk(&mut r, "e", &STANDARD.encode([5u8, 6, 7, 8])));
        assert_eq!(&event.payload[..], &[5, 6, 7, 8]);
    }

    #[test]
    fn test_malformed_segment_skipped() {
        let data = payload(12);
        let segments = encode_segments(&data, 8);
        assert_eq!(segments.len(), 2);

        let mut r = Reassembler::new();
        start(&mut r, "e", 12, Encoding::B64);
        assert!(chunk(&mut r, "e", "!!not base64!!").is_none());
        assert_eq!(r.skipped_segments(), 1);
        assert_eq!(r.state(), ReassemblyState::Accumulating);

        assert!(chunk(&mut r, "e", &segments[0]).is_none());
        let event = completed(chunk(&mut r, "e", &segments[1]));
        assert_eq!(event.payload, data);
    }

    #[test]
    fn test_malformed_json_skipped() {
        let mut r = Reassembler::new();
        start(&mut r, "e", 4, Encoding::Bin);
        assert!(r.on_text("{not json", Instant::now()).is_none());
        assert_eq!(r.state(), ReassemblyState::Accumulating);
    }

    #[test]
    fn test_foreign_event_id_ignored() {
        let mut r = Reassembler::new();
        start(&mut r, "a", 4, Encoding::B64);
        let other = STANDARD.encode([9u8, 9, 9, 9]);
        assert!(chunk(&mut r, "b", &other).is_none());
        assert!(end(&mut r, "b").is_none());
        assert_eq!(r.received_bytes(), 0);
        assert_eq!(r.pending_event_id(), Some("a"));
    }

    #[test]
    fn test_new_start_discards_previous() {
        let mut r = Reassembler::new();
        start(&mut r, "a", 10, Encoding::Bin);
        r.on_binary(&[1; 6]);

        start(&mut r, "b", 3, Encoding::Bin);
        assert_eq!(r.discarded_events(), 1);
        assert_eq!(r.received_bytes(), 0);

        let event = completed(r.on_binary(&[2, 2, 2]));
        assert_eq!(event.header.event_id, "b");
        assert_eq!(&event.payload[..], &[2, 2, 2]);
    }

    #[test]
    fn test_back_to_back_events_do_not_mix() {
        let first = payload(20);
        let second = Bytes::from(vec![0xAB; 15]);
        let mut r = Reassembler::new();
        let mut done = Vec::new();

        for (id, data) in [("one", &first), ("two", &second)] {
            start(&mut r, id, data.len() as u64, Encoding::B64);
            for s in encode_segments(data, 8) {
                if let Some(d) = chunk(&mut r, id, &s) {
                    done.push(completed(Some(d)));
                }
            }
            assert!(end(&mut r, id).is_none());
        }

        assert_eq!(done.len(), 2);
        assert_eq!(done[0].payload, first);
        assert_eq!(done[1].payload, second);
    }

    #[test]
    fn test_reset_discards_pending() {
        let mut r = Reassembler::new();
        start(&mut r, "e", 100, Encoding::Bin);
        r.on_binary(&[0; 50]);
        r.reset();

        assert_eq!(r.state(), ReassemblyState::Idle);
        assert_eq!(r.discarded_events(), 1);
        // Frames of the dead event arriving later go nowhere
        assert!(r.on_binary(&[0; 50]).is_none());
        assert_eq!(r.completed_events(), 0);
    }

    #[test]
    fn test_ack_and_error() {
        let mut r = Reassembler::new();
        let decoded = r.on_text(
            r#"{"type":"video_ack","bytes":1234,"content_type":"video/mp4"}"#,
            Instant::now(),
        );
        assert_eq!(
            decoded,
            Some(Decoded::Acknowledged {
                kind: EventKind::Video,
                ack: Ack {
                    bytes: 1234,
                    content_type: "video/mp4".into()
                }
            })
        );

        start(&mut r, "e", 4, Encoding::Bin);
        let decoded = r.on_text(r#"{"type":"error","error":"TOO_LARGE"}"#, Instant::now());
        assert_eq!(decoded, Some(Decoded::ServerError("TOO_LARGE".into())));
        // Informational messages leave reassembly untouched
        assert_eq!(r.pending_event_id(), Some("e"));
    }

    #[test]
    fn test_received_at_recorded_from_start() {
        let mut r = Reassembler::new();
        let t0 = Instant::now();
        r.on_message(
            WireMessage::Start(EventKind::Audio, header("e", 1, Encoding::Bin)),
            t0,
        );
        let event = completed(r.on_binary(&[1]));
        assert_eq!(event.received_at, t0);
        assert_eq!(event.kind, EventKind::Audio);
    }
}
