//! Audio Sender Application
//!
//! Streams a synthetic tone to a receiver over WebSocket, reconnecting on loss.
//!
//! Usage: `sender [ws://host:port/ws/audio]`

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adaptive_audio_streamer::{
    audio::AudioFrame,
    config::AppConfig,
    network::WsConnector,
    session::{SessionEvent, StreamSession},
};

/// Samples per channel in each produced frame
const FRAME_SAMPLES: usize = 1024;

const TONE_HZ: f32 = 440.0;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting audio sender");

    let mut config = AppConfig::load();
    if let Some(url) = std::env::args().nth(1) {
        config.network.server_url = url;
    }
    config.validate()?;

    tracing::info!("Target receiver: {}", config.network.server_url);

    let connector = Arc::new(WsConnector::new(config.network.server_url.clone()));
    let session = Arc::new(StreamSession::outbound(config.clone(), connector));
    let mut events = session.subscribe();
    session.start()?;

    // Log session events
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::ReconnectAttempt { attempt, delay_secs } => {
                    tracing::info!("Reconnect attempt {} in {}s", attempt, delay_secs)
                }
                SessionEvent::ChunkSizeChanged { from, to } => {
                    tracing::info!("Chunk size {} -> {}", from, to)
                }
                other => tracing::debug!("{:?}", other),
            }
        }
    });

    let producer = {
        let session = Arc::clone(&session);
        let stream = config.stream.clone();
        tokio::spawn(async move {
            let channels = stream.channels.max(1) as usize;
            let period = Duration::from_secs_f64(FRAME_SAMPLES as f64 / stream.sample_rate as f64);
            let mut ticker = tokio::time::interval(period);
            let mut phase = 0.0f32;
            let step = 2.0 * std::f32::consts::PI * TONE_HZ / stream.sample_rate as f32;
            let mut timestamp = 0u64;

            loop {
                ticker.tick().await;
                let mut samples = Vec::with_capacity(FRAME_SAMPLES * channels);
                for _ in 0..FRAME_SAMPLES {
                    let value = phase.sin() * 0.25;
                    samples.extend(std::iter::repeat(value).take(channels));
                    phase = (phase + step) % (2.0 * std::f32::consts::PI);
                }
                let frame = AudioFrame::new(samples, stream.sample_rate, stream.channels, timestamp);
                timestamp += frame.duration_us();

                if let Err(e) = session.push_frame(frame) {
                    tracing::debug!("Producer stopping: {}", e);
                    break;
                }
            }
        })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
            session.stop().await;
        }
        outcome = session.wait() => {
            if let Err(e) = outcome {
                tracing::error!("Session ended: {}", e);
            }
        }
    }

    producer.abort();
    let snapshot = session.snapshot();
    tracing::info!(
        "Sent {} chunks, {} bytes, loss {:.1}%",
        snapshot.counters.chunks_sent,
        snapshot.network.bytes_sent,
        snapshot.network.loss_rate * 100.0
    );

    Ok(())
}
