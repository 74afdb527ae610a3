//! # Adaptive Audio Streamer
//!
//! Real-time audio transport over an unreliable message channel, adapting
//! compression and chunk size to observed network conditions and
//! rebuilding an ordered, lossless signal on the far side.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── SENDER ────────────────────────────────┐
//! │  producer ──push_frame──▶ QualityAnalyzer ──▶ FrameBuffer (bounded)    │
//! │                                                     │ read_exact(chunk) │
//! │                                                     ▼                   │
//! │   NetworkMonitor ──conditions──▶ CompressionEngine (tier + fallback)   │
//! │        ▲                                            │                   │
//! │        │ acks / rtt                                 ▼                   │
//! │   AckTracker ◀──────────────── Packetizer ──▶ [AS|v|hdr|payload]       │
//! └──────────────────────────────────────────────────────┼─────────────────┘
//!                                                        │ WebSocket
//! ┌──────────────────────────────── RECEIVER ─────────────┼─────────────────┐
//! │   /ws/audio ──▶ StreamSession (inbound) ◀─────────────┘                 │
//! │        │ decode + CRC                                                    │
//! │        ▼                                                                 │
//! │   ClockSynchronizer (offset, jitter)   NetworkMonitor (latency)          │
//! │        │                                                                 │
//! │        ▼                                                                 │
//! │   ReorderWindow ──in order──▶ decompress ──▶ QualityAnalyzer ──▶ consumer│
//! │                                                                          │
//! │   SessionRegistry ──snapshots──▶ /api/status, /api/sessions              │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every session also runs an adaptation task that expires acks, purges the
//! reorder window, resynchronizes clocks and retunes chunk size and
//! compression tier.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default HTTP port for the status API and audio endpoint
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    /// Largest encoded packet accepted on the wire
    pub const MAX_PACKET_SIZE: usize = 1 << 20;

    /// Largest decompressed chunk a packet may declare
    pub const MAX_CHUNK_BYTES: usize = 256 * 1024;

    /// Ingest buffer capacity in bytes (about 20 s of 16 kHz mono)
    pub const DEFAULT_BUFFER_CAPACITY: usize = 640_000;
}
