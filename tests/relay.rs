//! End-to-end relay tests: a real server on an ephemeral port, viewers
//! connected through the supervisor, payloads checked byte for byte.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use livecast::client::{ClientConfig, ClientEvent, ConnectionSupervisor, Presentation};
use livecast::media::FsBlobStore;
use livecast::protocol::{MediaMeta, WireMessage};
use livecast::{Encoding, EventKind, MediaServer, ServerConfig, SupervisorHandle};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(10);

struct Relay {
    addr: SocketAddr,
    server: Arc<MediaServer>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl Relay {
    async fn start(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::start_on(listener, config).await
    }

    async fn start_on(listener: TcpListener, config: ServerConfig) -> Self {
        let addr = listener.local_addr().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsBlobStore::open(dir.path()).unwrap());
        let server = Arc::new(MediaServer::new(config.bind(addr), store));

        let (shutdown, rx) = oneshot::channel();
        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                let _ = server
                    .serve_until(listener, async {
                        let _ = rx.await;
                    })
                    .await;
            })
        };

        Self {
            addr,
            server,
            shutdown: Some(shutdown),
            task,
            _dir: dir,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn wait_for_connections(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            while self.server.registry().count(&[]).await < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connections did not register");
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

struct Viewer {
    handle: SupervisorHandle,
    events: mpsc::Receiver<ClientEvent>,
    presented: mpsc::UnboundedReceiver<Presentation>,
    task: JoinHandle<()>,
}

impl Viewer {
    fn connect(url: String) -> Self {
        let (tx, presented) = mpsc::unbounded_channel();
        let renderer = Arc::new(move |p: Presentation| {
            let _ = tx.send(p);
        });
        let config = ClientConfig::new(url).reconnect_backoff(Duration::from_millis(50));
        let (supervisor, handle, events) = ConnectionSupervisor::new(config, renderer);

        Self {
            handle,
            events,
            presented,
            task: supervisor.spawn(),
        }
    }

    async fn next_event(&mut self) -> ClientEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for client event")
            .expect("event channel closed")
    }

    async fn wait_connected(&mut self) {
        loop {
            if self.next_event().await == ClientEvent::Connected {
                return;
            }
        }
    }

    async fn next_presentation(&mut self) -> Presentation {
        tokio::time::timeout(WAIT, self.presented.recv())
            .await
            .expect("timed out waiting for presentation")
            .expect("renderer dropped")
    }

    async fn close(self) {
        self.handle.close();
        let _ = tokio::time::timeout(WAIT, self.task).await;
    }
}

fn png_payload(len: usize) -> Bytes {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend((0..len).map(|i| (i * 31 % 256) as u8));
    Bytes::from(data)
}

async fn round_trip(encoding: Encoding) {
    let config = ServerConfig::default()
        .encoding(encoding)
        .frame_size(16 * 1024)
        .segment_len(8_000)
        .start_after(EventKind::Image, 100);
    let relay = Relay::start(config).await;

    let mut producer = Viewer::connect(relay.url());
    let mut viewers = vec![Viewer::connect(relay.url()), Viewer::connect(relay.url())];
    producer.wait_connected().await;
    for viewer in viewers.iter_mut() {
        viewer.wait_connected().await;
    }
    relay.wait_for_connections(3).await;

    let payload = png_payload(200_000);
    let meta = MediaMeta::new("image/png")
        .username("alice")
        .display_time(0.0)
        .display_text("look")
        .filename("cat.png");
    assert_ok!(producer.handle.send_media(EventKind::Image, meta, payload.clone()).await);

    for viewer in viewers.iter_mut() {
        let scheduled = viewer.next_event().await;
        assert!(matches!(
            scheduled,
            ClientEvent::EventScheduled { kind: EventKind::Image, bytes, .. } if bytes == payload.len()
        ));

        let p = viewer.next_presentation().await;
        assert_eq!(p.kind, EventKind::Image);
        assert_eq!(p.payload, payload);
        assert_eq!(p.content_type, "image/png");
        assert_eq!(p.username, "alice");
        assert_eq!(p.display_text, "look");
        assert_eq!(p.display_time, 3.0);
    }

    assert_eq!(
        producer.next_event().await,
        ClientEvent::Acknowledged {
            kind: EventKind::Image,
            bytes: payload.len() as u64,
            content_type: "image/png".into(),
        }
    );
    // The producer is excluded from its own broadcast
    assert!(producer.presented.try_recv().is_err());

    let stats = relay.server.stats();
    assert_eq!(stats.uploads_accepted, 1);
    assert_eq!(stats.events_broadcast, 1);

    producer.close().await;
    for viewer in viewers {
        viewer.close().await;
    }
    relay.stop().await;
}

#[tokio::test]
async fn test_round_trip_bin() {
    round_trip(Encoding::Bin).await;
}

#[tokio::test]
async fn test_round_trip_b64() {
    round_trip(Encoding::B64).await;
}

#[tokio::test]
async fn test_rejected_upload_gets_error() {
    let relay = Relay::start(ServerConfig::default()).await;

    let mut viewer = Viewer::connect(relay.url());
    viewer.wait_connected().await;

    let (mut ws, _) = tokio_tungstenite::connect_async(relay.url()).await.unwrap();
    relay.wait_for_connections(2).await;

    // Declared as video but the bytes are a PNG
    let meta = WireMessage::Meta(EventKind::Video, MediaMeta::new("video/mp4"))
        .to_json()
        .unwrap();
    ws.send(Message::Text(meta)).await.unwrap();
    ws.send(Message::Binary(png_payload(64).to_vec())).await.unwrap();

    let reply = loop {
        match tokio::time::timeout(WAIT, ws.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => break WireMessage::parse(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("unexpected {:?}", other),
        }
    };
    assert_eq!(reply, WireMessage::error("UNSUPPORTED_FORMAT"));

    // Nothing reached the other viewer
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(viewer.events.try_recv().is_err());
    assert_eq!(relay.server.stats().uploads_rejected, 1);

    viewer.close().await;
    relay.stop().await;
}

#[tokio::test]
async fn test_viewer_reconnects_when_relay_appears() {
    // Reserve an address, then leave it unbound
    let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    let mut viewer = Viewer::connect(format!("ws://{}", addr));
    assert!(matches!(
        viewer.next_event().await,
        ClientEvent::Disconnected { .. }
    ));
    assert!(!viewer.handle.is_connected());

    let listener = TcpListener::bind(addr).await.unwrap();
    let relay = Relay::start_on(listener, ServerConfig::default()).await;

    viewer.wait_connected().await;
    assert!(viewer.handle.is_connected());
    relay.wait_for_connections(1).await;

    viewer.close().await;
    relay.stop().await;
}
