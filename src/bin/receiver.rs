//! Audio Receiver Application
//!
//! Accepts audio streams on `/ws/audio` and serves the status API.
//!
//! Usage: `receiver [bind-address:port]`

use anyhow::Result;
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adaptive_audio_streamer::{
    config::AppConfig,
    session::{DecodedChunk, SessionRegistry},
    ui::{AppState, WebServer},
};

/// Consumer report interval
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting audio receiver");

    let mut config = AppConfig::load();
    if let Some(addr) = std::env::args().nth(1) {
        match addr.rsplit_once(':') {
            Some((host, port)) => {
                config.ui.bind_address = host.to_string();
                config.ui.http_port = port.parse()?;
            }
            None => config.ui.bind_address = addr,
        }
    }
    config.validate()?;

    let registry = Arc::new(SessionRegistry::new());
    let (chunk_tx, chunk_rx) = bounded::<DecodedChunk>(config.stream.consumer_queue);

    // Downstream consumer
    std::thread::Builder::new()
        .name("audio-consumer".into())
        .spawn(move || consume(chunk_rx))?;

    let state = AppState::new(config.clone(), Arc::clone(&registry), "receiver").with_consumer(chunk_tx);
    let web_server = WebServer::new(state);
    let web_handle = web_server.start_background();

    tracing::info!(
        "Audio endpoint at ws://{}:{}/ws/audio",
        config.ui.bind_address,
        config.ui.http_port
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    registry.stop_all().await;
    web_handle.abort();

    Ok(())
}

#[derive(Default)]
struct StreamTotals {
    chunks: u64,
    bytes: u64,
    last_sequence: u64,
    peak_rms: f32,
}

/// Drain decoded chunks and periodically report per-stream totals
fn consume(rx: crossbeam_channel::Receiver<DecodedChunk>) {
    let mut totals: HashMap<u32, StreamTotals> = HashMap::new();
    let mut last_report = Instant::now();

    loop {
        match rx.recv_timeout(REPORT_INTERVAL) {
            Ok(chunk) => {
                let entry = totals.entry(chunk.frame.sample_rate()).or_default();
                entry.chunks += 1;
                entry.bytes += chunk.frame.byte_len() as u64;
                entry.last_sequence = chunk.sequence;
                entry.peak_rms = entry.peak_rms.max(chunk.quality.rms_level);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_report.elapsed() >= REPORT_INTERVAL {
            for (rate, stream) in &totals {
                tracing::info!(
                    "{} Hz: {} chunks, {} bytes, last seq {}, peak rms {:.3}",
                    rate,
                    stream.chunks,
                    stream.bytes,
                    stream.last_sequence,
                    stream.peak_rms
                );
            }
            last_report = Instant::now();
        }
    }
}
