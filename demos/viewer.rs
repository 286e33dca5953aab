//! Viewer example
//!
//! Run with: cargo run --example viewer -- [OPTIONS] [FILES...]
//!
//! Connects to a relay, writes every received event into `--out` at its
//! scheduled time, and uploads any files given on the command line.
//!
//! Examples:
//!   cargo run --example viewer                                  # watch only
//!   cargo run --example viewer -- --text "hi" cat.png clip.mp4  # upload two files
//!   LIVECAST_WS_URL=ws://relay:8765 cargo run --example viewer

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use livecast::client::{ClientConfig, ClientEvent, ConnectionSupervisor, Presentation, Profile};
use livecast::media::kind::extension_for;
use livecast::protocol::MediaMeta;

#[derive(Debug, Parser)]
#[command(name = "viewer", about = "Receive and present relay events")]
struct Args {
    /// Relay URL
    #[arg(long, env = "LIVECAST_WS_URL", default_value = "ws://127.0.0.1:8765")]
    url: String,

    /// Profile file holding the display name
    #[arg(long, default_value = "profile.json")]
    profile: PathBuf,

    /// Set and save a new display name
    #[arg(long)]
    username: Option<String>,

    /// Directory presented events are written to
    #[arg(long, default_value = "received")]
    out: PathBuf,

    /// Caption attached to uploads
    #[arg(long, default_value = "")]
    text: String,

    /// Seconds each upload stays on screen
    #[arg(long, default_value_t = 3.0)]
    display_time: f64,

    /// Files to upload once connected
    files: Vec<PathBuf>,
}

/// Writes each presented payload to disk
fn file_renderer(out: PathBuf) -> impl Fn(Presentation) + Send + Sync + 'static {
    move |p: Presentation| {
        let name = format!("{}.{}", p.event_id, extension_for(&p.content_type));
        let path = out.join(name);
        match std::fs::write(&path, &p.payload) {
            Ok(()) => println!(
                "[{}] {} from {}: {} ({} bytes, {:.1}s) -> {}",
                p.kind,
                p.event_id,
                p.username,
                p.display_text,
                p.payload.len(),
                p.display_time,
                path.display()
            ),
            Err(e) => eprintln!("Failed to write {}: {}", path.display(), e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("livecast=debug".parse()?)
                .add_directive("viewer=debug".parse()?),
        )
        .init();

    let profile = match &args.username {
        Some(name) => {
            let profile = Profile::new(name);
            profile.save(&args.profile)?;
            profile
        }
        None => Profile::load(&args.profile),
    };
    std::fs::create_dir_all(&args.out)?;

    println!("Connecting to {} as {}", args.url, profile.username);

    let renderer = Arc::new(file_renderer(args.out.clone()));
    let config = ClientConfig::new(args.url.clone());
    let (supervisor, handle, mut events) = ConnectionSupervisor::new(config, renderer);
    let task = supervisor.spawn();

    let mut pending_uploads = args.files.clone();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ClientEvent::Connected => {
                        println!("Connected");
                        for path in pending_uploads.drain(..) {
                            let meta = MediaMeta::new("")
                                .username(profile.username.as_str())
                                .display_time(args.display_time)
                                .display_text(args.text.as_str());
                            match handle.send_file(&path, meta).await {
                                Ok(kind) => println!("Uploading {} ({})", path.display(), kind),
                                Err(e) => eprintln!("Upload of {} failed: {}", path.display(), e),
                            }
                        }
                    }
                    ClientEvent::Disconnected { reason } => println!("Disconnected: {}", reason),
                    ClientEvent::EventScheduled { event_id, kind, bytes, delay } => {
                        println!("Scheduled {} {} ({} bytes) in {:?}", kind, event_id, bytes, delay);
                    }
                    ClientEvent::Acknowledged { kind, bytes, content_type } => {
                        println!("Upload accepted: {} {} ({} bytes)", kind, content_type, bytes);
                    }
                    ClientEvent::ServerError(error) => println!("Upload rejected: {}", error),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    handle.close();
    let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
    Ok(())
}
