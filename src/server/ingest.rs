//! Producer uploads
//!
//! A producer announces an upload with a `<kind>_meta` message and follows
//! it with exactly one binary message holding the payload. Accepted uploads
//! are stored, broadcast to every other connection and acknowledged; rejected
//! ones get an `error` reply and never reach the broadcast path.

use std::sync::Arc;

use bytes::Bytes;

use crate::broadcast::{BroadcastReport, BroadcastRequest};
use crate::error::{Error, IngestError, Result};
use crate::media::{classify_filename, validate_upload};
use crate::protocol::{Ack, EventKind, MediaMeta, WireMessage};
use crate::registry::{ConnectionId, Outbound};

use super::listener::ServerContext;

/// Upload state for one connection
pub(crate) struct IngestSession {
    connection_id: ConnectionId,
    context: Arc<ServerContext>,
    pending: Option<(EventKind, MediaMeta)>,
}

impl IngestSession {
    pub(crate) fn new(connection_id: ConnectionId, context: Arc<ServerContext>) -> Self {
        Self {
            connection_id,
            context,
            pending: None,
        }
    }

    /// Handle a structured message from the peer
    pub(crate) fn on_text(&mut self, text: &str) {
        match WireMessage::parse(text) {
            Ok(WireMessage::Meta(kind, meta)) => {
                if let Some((previous, _)) = self.pending.replace((kind, meta)) {
                    tracing::warn!(
                        connection_id = self.connection_id,
                        previous = %previous,
                        "Upload metadata replaced before payload arrived"
                    );
                }
            }
            Ok(other) => {
                tracing::debug!(
                    connection_id = self.connection_id,
                    message_type = %other.message_type(),
                    "Ignoring message from peer"
                );
            }
            Err(e) => {
                tracing::warn!(connection_id = self.connection_id, error = %e, "Malformed message from peer");
            }
        }
    }

    /// Handle the binary payload that completes an upload
    pub(crate) async fn on_binary(&mut self, data: Vec<u8>) {
        let payload = Bytes::from(data);
        let size = payload.len();

        let result = match self.pending.take() {
            Some((kind, meta)) => self.accept(kind, meta, payload).await,
            None => Err(IngestError::MissingMeta.into()),
        };

        let stats = self.context.registry.stats();
        let reply = match result {
            Ok(report) => {
                stats.on_upload(true);
                WireMessage::Ack(
                    report.kind,
                    Ack {
                        bytes: report.payload_bytes as u64,
                        content_type: report.content_type,
                    },
                )
            }
            Err(e) => {
                stats.on_upload(false);
                tracing::warn!(
                    connection_id = self.connection_id,
                    bytes = size,
                    error = %e,
                    "Upload rejected"
                );
                WireMessage::error(error_code(&e))
            }
        };

        self.reply(reply).await;
    }

    async fn accept(&self, kind: EventKind, meta: MediaMeta, payload: Bytes) -> Result<BroadcastReport> {
        let config = &self.context.config;

        validate_upload(kind, &meta.content_type, &payload, config.max_bytes.get(kind))?;
        if let Some(filename) = &meta.filename {
            if classify_filename(filename) != Some(kind) {
                return Err(IngestError::FilenameMismatch {
                    kind,
                    filename: filename.clone(),
                }
                .into());
            }
        }

        let store = Arc::clone(&self.context.store);
        let data = payload.clone();
        let content_type = meta.content_type.clone();
        let filename = meta.filename.clone();
        let stored = tokio::task::spawn_blocking(move || {
            store.put(&data, kind, &content_type, filename.as_deref())
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;

        tracing::info!(
            connection_id = self.connection_id,
            kind = %kind,
            filename = %stored.filename,
            username = %meta.username,
            bytes = payload.len(),
            "Upload accepted"
        );

        let display_time = if meta.display_time.is_finite() && meta.display_time > 0.0 {
            meta.display_time
        } else {
            config.default_display_time
        };

        let request = BroadcastRequest::new(kind, meta.content_type, payload)
            .username(meta.username)
            .display_time(display_time)
            .display_text(meta.display_text)
            .start_after_ms(config.start_after_ms.get(kind));

        self.context
            .encoder
            .broadcast(request, config.encoding, &[self.connection_id])
            .await
    }

    async fn reply(&self, message: WireMessage) {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode reply");
                return;
            }
        };

        if let Err(e) = self
            .context
            .registry
            .send_to(self.connection_id, Outbound::text(text))
            .await
        {
            tracing::debug!(connection_id = self.connection_id, error = %e, "Reply not delivered");
        }
    }
}

/// Short code sent to the producer in an `error` reply
fn error_code(error: &Error) -> &'static str {
    match error {
        Error::Ingest(e) => e.code(),
        Error::Io(_) => "STORE_FAILED",
        _ => "INTERNAL_ERROR",
    }
}
