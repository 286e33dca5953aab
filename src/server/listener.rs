//! Relay server listener
//!
//! Accepts TCP connections, upgrades them to WebSocket and runs one task per
//! connection. Each task splits its socket:
//!
//! ```text
//!              ┌───────────── connection task ─────────────┐
//!   socket ──► │ reader ──► IngestSession ──► EventEncoder │ ──► registry
//!              │                                           │
//!   socket ◄── │ writer ◄── bounded outbound queue ◄────────┼──── registry
//!              └───────────────────────────────────────────┘
//! ```
//!
//! Whichever half stops first ends the connection; the registry entry is
//! removed either way.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async_with_config, WebSocketStream};

use crate::broadcast::EventEncoder;
use crate::error::{Error, Result};
use crate::media::BlobStore;
use crate::protocol::EventKind;
use crate::registry::{ConnectionId, ConnectionRegistry, Outbound};
use crate::server::config::ServerConfig;
use crate::server::ingest::IngestSession;
use crate::stats::RelayStatsSnapshot;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// State shared by every connection task
pub(crate) struct ServerContext {
    pub(crate) config: ServerConfig,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) encoder: Arc<EventEncoder>,
    pub(crate) store: Arc<dyn BlobStore>,
}

/// Media relay server
pub struct MediaServer {
    context: Arc<ServerContext>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl MediaServer {
    /// Create a new server with the given configuration and blob store
    pub fn new(config: ServerConfig, store: Arc<dyn BlobStore>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let registry = Arc::new(ConnectionRegistry::with_config(config.registry_config()));
        let encoder = Arc::new(
            EventEncoder::new(Arc::clone(&registry))
                .frame_size(config.frame_size)
                .segment_len(config.segment_len),
        );

        Self {
            context: Arc::new(ServerContext {
                config,
                registry,
                encoder,
                store,
            }),
            connection_semaphore,
        }
    }

    /// Get a reference to the connection registry
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.context.registry
    }

    /// Encoder used for producer uploads; also usable to broadcast
    /// server-originated events
    pub fn encoder(&self) -> &Arc<EventEncoder> {
        &self.context.encoder
    }

    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.context.registry.stats().snapshot()
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.serve_until(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// Lets callers bind port 0 and read the assigned address first.
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        }
    }

    async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.context.config.bind_addr).await?;
        tracing::info!(
            addr = %self.context.config.bind_addr,
            encoding = %self.context.config.encoding,
            "Relay server listening"
        );
        Ok(listener)
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // The permit lives as long as the connection task
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        if self.context.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let context = Arc::clone(&self.context);
        tokio::spawn(async move {
            if let Err(e) = serve_connection(context, socket, peer_addr, permit).await {
                tracing::debug!(peer = %peer_addr, error = %e, "Connection error");
            }
        });
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.context.config.bind_addr
    }
}

async fn serve_connection(
    context: Arc<ServerContext>,
    socket: TcpStream,
    peer_addr: SocketAddr,
    _permit: Option<OwnedSemaphorePermit>,
) -> Result<()> {
    let accept = accept_async_with_config(socket, Some(websocket_config(&context.config)));
    let ws = tokio::time::timeout(context.config.handshake_timeout, accept)
        .await
        .map_err(|_| Error::Timeout("handshake"))??;

    let (sink, source) = ws.split();
    let (handle, outbound) = context.registry.open_handle(Some(peer_addr));
    let id = handle.id;
    context.registry.add(handle).await;

    let result = tokio::select! {
        result = read_loop(Arc::clone(&context), id, source) => result,
        result = write_loop(&context, id, sink, outbound) => result,
    };

    context.registry.remove(id).await;
    tracing::debug!(connection_id = id, "Connection closed");
    result
}

/// Incoming limits sized so the largest allowed upload fits in one message
fn websocket_config(config: &ServerConfig) -> WebSocketConfig {
    let largest = EventKind::ALL
        .iter()
        .map(|kind| config.max_bytes.get(*kind))
        .max()
        .unwrap_or(0);
    // Headroom so an oversized upload still arrives and gets a TOO_LARGE reply
    let limit = largest.saturating_add(largest / 4).max(1024 * 1024);

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(limit);
    ws_config.max_frame_size = Some(limit);
    ws_config
}

async fn read_loop(context: Arc<ServerContext>, id: ConnectionId, mut source: WsSource) -> Result<()> {
    let mut ingest = IngestSession::new(id, context);

    while let Some(message) = source.next().await {
        match message? {
            Message::Text(text) => ingest.on_text(&text),
            Message::Binary(data) => ingest.on_binary(data).await,
            Message::Close(_) => break,
            // Pings are answered by the protocol layer
            _ => {}
        }
    }

    Ok(())
}

async fn write_loop(
    context: &ServerContext,
    id: ConnectionId,
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<Outbound>,
) -> Result<()> {
    while let Some(message) = outbound.recv().await {
        let message = match message {
            Outbound::Text(text) => Message::Text(text.to_string()),
            Outbound::Binary(data) => Message::Binary(data.to_vec()),
        };

        tokio::time::timeout(context.config.send_timeout, sink.send(message))
            .await
            .map_err(|_| Error::Timeout("send"))??;
    }

    // Queue closed: the registry evicted this connection
    tracing::debug!(connection_id = id, "Outbound queue closed");
    let _ = sink.close().await;
    Ok(())
}
