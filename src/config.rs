//! Application configuration
//!
//! Every tunable of the pipeline lives here with its default. The file is
//! stored as TOML in the platform configuration directory and missing
//! sections fall back to defaults.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::Error;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub stream: StreamConfig,
    pub buffer: BufferConfig,
    pub compression: CompressionConfig,
    pub reorder: ReorderConfig,
    pub sync: SyncConfig,
    pub monitor: MonitorConfig,
    pub adaptation: AdaptationConfig,
    pub reconnect: ReconnectConfig,
    pub ui: UiConfig,
}

impl AppConfig {
    /// Default config file location, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "AudioStreaming", "adaptive-audio-streamer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write to the default location
    pub fn save(&self) -> Result<PathBuf, Error> {
        let path = Self::default_path()
            .ok_or_else(|| Error::Config("no configuration directory available".into()))?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {
        let a = &self.adaptation;
        if a.chunk_size_min == 0 || a.chunk_size_min > a.chunk_size_max {
            return Err(Error::Config(format!(
                "invalid chunk size range {}..={}",
                a.chunk_size_min, a.chunk_size_max
            )));
        }
        if !(a.chunk_size_min..=a.chunk_size_max).contains(&a.chunk_size_base) {
            return Err(Error::Config(format!(
                "chunk_size_base {} outside {}..={}",
                a.chunk_size_base, a.chunk_size_min, a.chunk_size_max
            )));
        }
        if self.buffer.capacity_bytes < a.chunk_size_max {
            return Err(Error::Config(
                "buffer capacity must hold at least one maximum-size chunk".into(),
            ));
        }
        if self.network.max_chunk_bytes < a.chunk_size_max {
            return Err(Error::Config(format!(
                "network.max_chunk_bytes {} is below chunk_size_max {}",
                self.network.max_chunk_bytes, a.chunk_size_max
            )));
        }
        if self.stream.channels == 0 {
            return Err(Error::Config("channels must be at least 1".into()));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(Error::Config("reconnect.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// WebSocket URL the sender dials
    pub server_url: String,
    /// Largest binary frame accepted from the wire
    pub max_packet_size: usize,
    /// Largest decompressed chunk a received packet may declare
    pub max_chunk_bytes: usize,
    /// Unacknowledged packets older than this count as lost
    pub ack_timeout_ms: u64,
    /// Whether the receiving side acknowledges each packet
    pub send_acks: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_url: format!("ws://127.0.0.1:{}/ws/audio", DEFAULT_HTTP_PORT),
            max_packet_size: MAX_PACKET_SIZE,
            max_chunk_bytes: MAX_CHUNK_BYTES,
            ack_timeout_ms: 5000,
            send_acks: true,
        }
    }
}

impl NetworkConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// PCM stream format and consumer hand-off
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Capacity of the downstream consumer queue, in chunks
    pub consumer_queue: usize,
    /// Drop frames whose RMS is below `silence_threshold` before sending
    pub skip_silent_frames: bool,
    pub silence_threshold: f32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            consumer_queue: 256,
            skip_silent_frames: false,
            silence_threshold: crate::audio::quality::DEFAULT_SILENCE_THRESHOLD,
        }
    }
}

/// Ingest buffer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub capacity_bytes: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// Compression tiers and selection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Payloads smaller than this are always sent uncompressed
    pub min_payload_bytes: usize,
    pub fast_level: u32,
    pub balanced_level: u32,
    pub lossless_level: u32,
    /// Minimum size reduction (fraction) each tier must achieve
    pub fast_min_improvement: f64,
    pub balanced_min_improvement: f64,
    pub lossless_min_improvement: f64,
    pub high_cpu_percent: f64,
    pub cpu_headroom_percent: f64,
    pub low_bandwidth_mbps: f64,
    pub high_latency_ms: f64,
    /// Window over which the engine measures its own CPU load
    pub load_window_ms: u64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_payload_bytes: 256,
            fast_level: 1,
            balanced_level: 6,
            lossless_level: 9,
            fast_min_improvement: 0.10,
            balanced_min_improvement: 0.20,
            lossless_min_improvement: 0.30,
            high_cpu_percent: 80.0,
            cpu_headroom_percent: 50.0,
            low_bandwidth_mbps: 1.0,
            high_latency_ms: 300.0,
            load_window_ms: 1000,
        }
    }
}

/// Receive-side reordering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReorderConfig {
    /// Held packets older than this are purged and their gap abandoned
    pub packet_timeout_ms: u64,
    /// Larger forward jumps are treated as a stream discontinuity
    pub max_gap: u64,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            packet_timeout_ms: 5000,
            max_gap: 1024,
        }
    }
}

impl ReorderConfig {
    pub fn packet_timeout(&self) -> Duration {
        Duration::from_millis(self.packet_timeout_ms)
    }
}

/// Clock synchronization and jitter estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub sync_interval_secs: u64,
    /// Recent arrivals kept for jitter estimation
    pub jitter_window: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 30,
            jitter_window: 50,
        }
    }
}

/// Network quality thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub latency_window: usize,
    pub min_stable_samples: usize,
    /// Bandwidth heuristic: `reference_bandwidth_mbps` at `reference_latency_ms`
    pub reference_bandwidth_mbps: f64,
    pub reference_latency_ms: f64,
    /// Latency at which the latency score reaches zero
    pub worst_latency_ms: f64,
    /// Loss rate at which the loss score reaches zero
    pub worst_loss_rate: f64,
    pub stable_loss_rate: f64,
    pub stable_latency_ms: f64,
    pub adapt_loss_rate: f64,
    pub adapt_latency_ms: f64,
    pub adapt_quality_score: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            latency_window: 50,
            min_stable_samples: 5,
            reference_bandwidth_mbps: 10.0,
            reference_latency_ms: 50.0,
            worst_latency_ms: 1000.0,
            worst_loss_rate: 0.10,
            stable_loss_rate: 0.05,
            stable_latency_ms: 500.0,
            adapt_loss_rate: 0.02,
            adapt_latency_ms: 300.0,
            adapt_quality_score: 0.7,
        }
    }
}

/// Closed-loop chunk size tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationConfig {
    pub interval_secs: u64,
    pub chunk_size_base: usize,
    pub chunk_size_min: usize,
    pub chunk_size_max: usize,
    pub shrink_factor: f64,
    pub grow_factor: f64,
    /// Below this average latency a stable link may grow its chunks
    pub low_latency_ms: f64,
    /// Quality score needed to leave the degraded state
    pub recovery_score: f64,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            chunk_size_base: 4096,
            chunk_size_min: 1024,
            chunk_size_max: 8192,
            shrink_factor: 0.8,
            grow_factor: 1.2,
            low_latency_ms: 100.0,
            recovery_score: 0.7,
        }
    }
}

impl AdaptationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Reconnect with exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub backoff_cap_secs: u64,
    /// Uptime after which a connection resets the failure count
    pub stable_after_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_cap_secs: 30,
            stable_after_secs: 10,
        }
    }
}

impl ReconnectConfig {
    /// Wait before the next attempt: `min(2^attempt, cap)` seconds
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = 1u64
            .checked_shl(attempt)
            .unwrap_or(u64::MAX)
            .min(self.backoff_cap_secs);
        Duration::from_secs(secs)
    }

    pub fn stable_after(&self) -> Duration {
        Duration::from_secs(self.stable_after_secs)
    }
}

/// Status API server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}
