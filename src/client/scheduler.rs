//! Playback scheduling
//!
//! Each completed event is presented at `received_at + start_after_ms`,
//! where `received_at` is the local monotonic time its start message
//! arrived. The producer's clock never enters the calculation, so clock
//! skew between machines cannot shift playback. Events whose deadline has
//! already passed are presented immediately.
//!
//! Presentation runs on the blocking pool so a slow renderer never stalls
//! the connection's read loop.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::protocol::{constants, unix_time_ms, EventKind};

use super::reassembly::CompletedEvent;

/// What the renderer is asked to show
#[derive(Debug, Clone, PartialEq)]
pub struct Presentation {
    pub event_id: String,
    pub kind: EventKind,
    pub payload: Bytes,
    pub content_type: String,
    /// Seconds on screen; always positive
    pub display_time: f64,
    pub display_text: String,
    pub username: String,
}

impl Presentation {
    fn from_event(event: CompletedEvent) -> Self {
        let header = event.header;
        let display_time = if header.display_time.is_finite() && header.display_time > 0.0 {
            header.display_time
        } else {
            constants::DEFAULT_DISPLAY_TIME
        };

        Self {
            event_id: header.event_id,
            kind: event.kind,
            payload: event.payload,
            content_type: header.content_type,
            display_time,
            display_text: header.display_text,
            username: header.username,
        }
    }

    pub fn display_duration(&self) -> Duration {
        Duration::from_secs_f64(self.display_time)
    }
}

/// Presentation surface
///
/// Called once per event at its scheduled time, off the async runtime.
/// Implementations decide how to show the payload and for how long.
pub trait Renderer: Send + Sync + 'static {
    fn present(&self, presentation: Presentation);
}

impl<F> Renderer for F
where
    F: Fn(Presentation) + Send + Sync + 'static,
{
    fn present(&self, presentation: Presentation) {
        self(presentation)
    }
}

/// Schedules completed events for presentation
#[derive(Clone)]
pub struct PlaybackScheduler {
    renderer: Arc<dyn Renderer>,
}

impl PlaybackScheduler {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self { renderer }
    }

    /// Local time at which `event` should be presented
    pub fn deadline(event: &CompletedEvent) -> Instant {
        event.received_at + Duration::from_millis(event.header.start_after_ms)
    }

    /// Spawn a task that presents `event` at its deadline
    pub fn schedule(&self, event: CompletedEvent) -> JoinHandle<()> {
        let renderer = Arc::clone(&self.renderer);
        let deadline = Self::deadline(&event);

        if event.header.server_ts_ms > 0 {
            let skew_ms = unix_time_ms() as i64 - event.header.server_ts_ms as i64;
            tracing::debug!(
                event_id = %event.header.event_id,
                skew_ms = skew_ms,
                "Producer clock skew (informational)"
            );
        }

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;

            let presentation = Presentation::from_event(event);
            let event_id = presentation.event_id.clone();
            let late_by = Instant::now().saturating_duration_since(deadline);
            tracing::info!(
                event_id = %event_id,
                kind = %presentation.kind,
                bytes = presentation.payload.len(),
                late_ms = late_by.as_millis() as u64,
                "Presenting event"
            );

            if let Err(e) = tokio::task::spawn_blocking(move || renderer.present(presentation)).await {
                tracing::error!(event_id = %event_id, error = %e, "Renderer panicked");
            }
        })
    }
}
