//! Connection supervisor
//!
//! Keeps one duplex channel to the relay open for the lifetime of the
//! viewer, reassembles incoming events and hands them to the scheduler.
//!
//! ```text
//!              ┌──────────── reconnect_backoff ◄──────────┐
//!              ▼                                          │
//!   connect ──► read loop ──► Reassembler ──► Scheduler   │
//!              │                                          │
//!              ├── ping task: ping every ping_interval    │
//!              └── transport error / close ───────────────┘
//!                  (pending event discarded, ping task
//!                   aborted, sink cleared)
//! ```
//!
//! All sends on the channel (keepalive pings and uploads) go through one
//! async mutex around the sink, so the meta and binary messages of an
//! upload are never separated by another write. The ping task waits on that
//! lock on its own; the read loop never does.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};
use crate::media::{classify_filename, content_type_for_filename, validate_upload};
use crate::protocol::{EventKind, MediaMeta, WireMessage};

use super::config::ClientConfig;
use super::reassembly::{Decoded, Reassembler};
use super::scheduler::{PlaybackScheduler, Renderer};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Events reported by the supervisor
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Channel established
    Connected,

    /// Channel lost; a reconnect follows unless shutting down
    Disconnected { reason: String },

    /// An event finished reassembling and will be presented after `delay`
    EventScheduled {
        event_id: String,
        kind: EventKind,
        bytes: usize,
        delay: Duration,
    },

    /// The relay accepted one of our uploads
    Acknowledged {
        kind: EventKind,
        bytes: u64,
        content_type: String,
    },

    /// The relay rejected one of our uploads
    ServerError(String),
}

struct Shared {
    /// Write half of the current channel; the lock is the send lock
    sink: Mutex<Option<WsSink>>,
    connected: AtomicBool,
}

/// Cloneable control handle for a running supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    shared: Arc<Shared>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SupervisorHandle {
    /// Whether a channel is currently established
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Upload a media payload: one `<kind>_meta` message then one binary
    /// message, sent back to back under the send lock
    ///
    /// The payload is checked against the same rules the relay applies, so
    /// an obviously bad upload fails here instead of round-tripping.
    pub async fn send_media(&self, kind: EventKind, meta: MediaMeta, payload: Bytes) -> Result<()> {
        validate_upload(kind, &meta.content_type, &payload, kind.default_max_bytes())?;

        let text = WireMessage::Meta(kind, meta).to_json()?;
        let bytes = payload.len();

        let mut guard = self.shared.sink.lock().await;
        let sink = guard.as_mut().ok_or(Error::NotConnected)?;
        sink.send(Message::Text(text)).await?;
        sink.send(Message::Binary(payload.to_vec())).await?;

        tracing::info!(kind = %kind, bytes = bytes, "Upload sent");
        Ok(())
    }

    /// Upload a file, deriving its kind and content type from the file name
    ///
    /// `meta` supplies the display fields; its content type and file name
    /// are overwritten.
    pub async fn send_file(&self, path: impl AsRef<Path>, meta: MediaMeta) -> Result<EventKind> {
        let path = path.as_ref();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let (kind, content_type) = classify_filename(name)
            .zip(content_type_for_filename(name))
            .ok_or_else(|| Error::UnsupportedFormat(path.display().to_string()))?;

        let payload = Bytes::from(tokio::fs::read(path).await?);
        let meta = MediaMeta {
            content_type: content_type.to_string(),
            filename: Some(name.to_string()),
            ..meta
        };

        self.send_media(kind, meta, payload).await?;
        Ok(kind)
    }

    /// Stop the supervisor and close the channel
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Owns the reconnect loop for one relay endpoint
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use livecast::client::{ClientConfig, ConnectionSupervisor, Presentation};
///
/// # async fn example() {
/// let renderer = Arc::new(|p: Presentation| println!("show {} ({} bytes)", p.event_id, p.payload.len()));
/// let (supervisor, handle, mut events) =
///     ConnectionSupervisor::new(ClientConfig::new("ws://127.0.0.1:8765"), renderer);
///
/// tokio::spawn(async move {
///     while let Some(event) = events.recv().await {
///         println!("{:?}", event);
///     }
/// });
///
/// let task = supervisor.spawn();
/// // ...
/// handle.close();
/// let _ = task.await;
/// # }
/// ```
pub struct ConnectionSupervisor {
    config: ClientConfig,
    scheduler: PlaybackScheduler,
    shared: Arc<Shared>,
    shutdown: watch::Receiver<bool>,
    event_tx: mpsc::Sender<ClientEvent>,
    reassembler: Reassembler,
    ping_task: Option<JoinHandle<()>>,
}

impl ConnectionSupervisor {
    /// Create a supervisor, its control handle and its event receiver
    pub fn new(
        config: ClientConfig,
        renderer: Arc<dyn Renderer>,
    ) -> (Self, SupervisorHandle, mpsc::Receiver<ClientEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            sink: Mutex::new(None),
            connected: AtomicBool::new(false),
        });

        let handle = SupervisorHandle {
            shared: Arc::clone(&shared),
            shutdown: Arc::new(shutdown_tx),
        };

        let supervisor = Self {
            config,
            scheduler: PlaybackScheduler::new(renderer),
            shared,
            shutdown: shutdown_rx,
            event_tx,
            reassembler: Reassembler::new(),
            ping_task: None,
        };

        (supervisor, handle, event_rx)
    }

    /// Run the supervisor on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Connect, serve and reconnect until [`SupervisorHandle::close`]
    pub async fn run(mut self) {
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let result = tokio::select! {
                result = self.connect_and_serve() => result,
                _ = shutdown.changed() => break,
            };

            let reason = match result {
                Ok(()) => "closed by relay".to_string(),
                Err(e) => e.to_string(),
            };
            self.teardown().await;
            tracing::warn!(
                url = %self.config.url,
                reason = %reason,
                retry_in_ms = self.config.reconnect_backoff.as_millis() as u64,
                "Disconnected from relay"
            );
            self.emit(ClientEvent::Disconnected { reason });

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_backoff) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.teardown().await;
        self.emit(ClientEvent::Disconnected {
            reason: "shutdown".to_string(),
        });
        tracing::info!(url = %self.config.url, "Supervisor stopped");
    }

    async fn connect_and_serve(&mut self) -> Result<()> {
        tracing::debug!(url = %self.config.url, "Connecting");
        let (stream, _response) =
            tokio::time::timeout(self.config.connect_timeout, connect_async(self.config.url.as_str()))
                .await
                .map_err(|_| Error::Timeout("connect"))??;

        let (sink, source) = stream.split();
        *self.shared.sink.lock().await = Some(sink);
        self.shared.connected.store(true, Ordering::Release);

        tracing::info!(url = %self.config.url, "Connected to relay");
        self.emit(ClientEvent::Connected);

        let period = self.config.ping_interval.max(Duration::from_millis(1));
        self.ping_task = Some(tokio::spawn(ping_loop(Arc::clone(&self.shared), period)));

        self.read_loop(source).await
    }

    async fn read_loop(&mut self, mut source: WsSource) -> Result<()> {
        while let Some(message) = source.next().await {
            let decoded = match message? {
                Message::Text(text) => self.reassembler.on_text(&text, Instant::now()),
                Message::Binary(data) => self.reassembler.on_binary(&data),
                Message::Close(frame) => {
                    tracing::debug!(frame = ?frame, "Close frame received");
                    return Ok(());
                }
                _ => None,
            };

            if let Some(decoded) = decoded {
                self.dispatch(decoded);
            }
        }

        Err(Error::ChannelClosed)
    }

    fn dispatch(&self, decoded: Decoded) {
        match decoded {
            Decoded::Completed(event) => {
                let delay = PlaybackScheduler::deadline(&event).saturating_duration_since(Instant::now());
                let scheduled = ClientEvent::EventScheduled {
                    event_id: event.header.event_id.clone(),
                    kind: event.kind,
                    bytes: event.payload.len(),
                    delay,
                };
                tracing::info!(
                    event_id = %event.header.event_id,
                    kind = %event.kind,
                    bytes = event.payload.len(),
                    delay_ms = delay.as_millis() as u64,
                    "Event scheduled"
                );
                self.scheduler.schedule(event);
                self.emit(scheduled);
            }
            Decoded::Acknowledged { kind, ack } => {
                tracing::info!(kind = %kind, bytes = ack.bytes, "Upload acknowledged");
                self.emit(ClientEvent::Acknowledged {
                    kind,
                    bytes: ack.bytes,
                    content_type: ack.content_type,
                });
            }
            Decoded::ServerError(error) => {
                tracing::warn!(error = %error, "Relay rejected upload");
                self.emit(ClientEvent::ServerError(error));
            }
        }
    }

    async fn teardown(&mut self) {
        self.shared.connected.store(false, Ordering::Release);
        if let Some(task) = self.ping_task.take() {
            task.abort();
        }
        self.reassembler.reset();
        if let Some(mut sink) = self.shared.sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }

    fn emit(&self, event: ClientEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            tracing::debug!(error = %e, "Client event dropped");
        }
    }
}

/// Keepalive for one connection; ends when the channel is gone or a ping
/// fails, leaving the read loop to notice the disconnect
async fn ping_loop(shared: Arc<Shared>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        ticker.tick().await;

        let mut guard = shared.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return;
        };
        if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
            tracing::debug!(error = %e, "Ping failed");
            return;
        }
    }
}
