use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use voxstream::{AudioFile, Config, SessionEvent, SessionFactory};

#[derive(Parser, Debug)]
#[command(name = "voxstream", about = "Stream a WAV file to a speech recognizer")]
struct Args {
    /// Config file, without extension
    #[arg(short, long, default_value = "config/voxstream")]
    config: String,

    /// WAV file to stream
    #[arg(short, long)]
    wav: String,

    /// Override the configured backend ("cloud" or "local")
    #[arg(short, long)]
    backend: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config))?;
    if let Some(backend) = args.backend {
        cfg.service.backend = backend;
    }

    info!(
        "{} streaming via '{}' backend",
        cfg.service.name, cfg.service.backend
    );

    let audio = AudioFile::open(&args.wav)?;
    let chunks = audio.pcm_chunks(cfg.audio.chunk_ms);
    let pace = Duration::from_millis(cfg.audio.chunk_ms as u64);

    let mut session = SessionFactory::create(cfg.backend_kind()?);
    let mut events = session.start().await?;

    // Feed in real time on a side task; the session buffers on its own
    // while the transport is still connecting.
    let feeder = tokio::spawn(async move {
        for chunk in chunks {
            if !session.is_active() {
                break;
            }
            session.feed(chunk);
            tokio::time::sleep(pace).await;
        }
        session.end();
        session
    });

    let mut final_text = None;
    let mut failure = None;
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Partial { text } => {
                print!("\r{text}");
                let _ = std::io::stdout().flush();
            }
            SessionEvent::Final { text } => {
                println!("\r{text}");
                final_text = Some(text);
            }
            SessionEvent::Error { message } => {
                warn!("Session error: {message}");
                failure = Some(message);
            }
        }
    }

    let session = feeder.await.context("Feeder task panicked")?;
    let stats = session.stats();
    info!(
        "Sent {} frames ({} bytes), received {} results in {:.1}s",
        stats.frames_sent, stats.bytes_sent, stats.results_received, stats.duration_secs
    );

    if let Some(message) = failure {
        anyhow::bail!("Recognition failed: {message}");
    }
    if final_text.is_none() {
        anyhow::bail!("Session closed without a final transcript");
    }
    Ok(())
}
