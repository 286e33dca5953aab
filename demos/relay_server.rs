//! Relay server example
//!
//! Run with: cargo run --example relay_server -- [OPTIONS]
//!
//! Examples:
//!   cargo run --example relay_server                          # binds to 0.0.0.0:8765, b64
//!   cargo run --example relay_server -- --encoding bin        # raw binary frames
//!   LIVECAST_BIND=127.0.0.1:9000 cargo run --example relay_server
//!
//! Connect viewers with the `viewer` example. Any viewer can also upload a
//! file, which every other viewer then plays at the same moment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use livecast::media::FsBlobStore;
use livecast::{Encoding, MediaServer, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "relay_server", about = "Broadcast media events to connected viewers")]
struct Args {
    /// Address to bind to
    #[arg(long, env = "LIVECAST_BIND", default_value = "0.0.0.0:8765")]
    bind: SocketAddr,

    /// Wire encoding for broadcasts (bin or b64)
    #[arg(long, default_value = "b64")]
    encoding: Encoding,

    /// Directory accepted uploads are stored in
    #[arg(long, default_value = "uploads")]
    store_dir: PathBuf,

    /// Maximum concurrent connections (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_connections: usize,

    /// Seconds between stats log lines (0 = off)
    #[arg(long, default_value_t = 30)]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("livecast=debug".parse()?)
                .add_directive("relay_server=debug".parse()?),
        )
        .init();

    let config = ServerConfig::with_addr(args.bind)
        .encoding(args.encoding)
        .max_connections(args.max_connections);
    let store = Arc::new(FsBlobStore::open(&args.store_dir)?);

    println!("Starting relay on ws://{} ({})", config.bind_addr, config.encoding);
    println!("Uploads stored in {}", store.root().display());
    println!();

    let server = Arc::new(MediaServer::new(config, store));

    if args.stats_interval > 0 {
        let server = Arc::clone(&server);
        let period = Duration::from_secs(args.stats_interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let stats = server.stats();
                tracing::info!(
                    active = stats.active_connections,
                    total = stats.total_connections,
                    evicted = stats.evicted_connections,
                    events = stats.events_broadcast,
                    bytes = stats.payload_bytes_broadcast,
                    uploads_rejected = stats.uploads_rejected,
                    "Relay stats"
                );
            }
        });
    }

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    Ok(())
}
