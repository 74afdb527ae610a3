//! Chunk size adaptation

use crate::audio::align_to_frame;
use crate::config::AdaptationConfig;
use crate::network::NetworkStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptationDecision {
    pub degraded: bool,
    pub chunk_size: usize,
}

/// Pure decision function over the latest network statistics
#[derive(Debug, Clone)]
pub struct AdaptationPolicy {
    config: AdaptationConfig,
    channels: u16,
}

impl AdaptationPolicy {
    pub fn new(config: AdaptationConfig, channels: u16) -> Self {
        Self { config, channels }
    }

    pub fn initial_chunk_size(&self) -> usize {
        self.clamp(self.config.chunk_size_base)
    }

    /// Shrink while the link needs adapting, grow while it is stable and
    /// fast, otherwise hold. Leaving the degraded state needs the quality
    /// score back at `recovery_score`.
    pub fn evaluate(&self, stats: &NetworkStats, should_adapt: bool, chunk_size: usize) -> AdaptationDecision {
        if should_adapt {
            return AdaptationDecision {
                degraded: true,
                chunk_size: self.clamp((chunk_size as f64 * self.config.shrink_factor) as usize),
            };
        }

        let degraded = stats.quality_score < self.config.recovery_score;
        let chunk_size = if !degraded && stats.stable && stats.average_latency_ms < self.config.low_latency_ms {
            self.clamp((chunk_size as f64 * self.config.grow_factor) as usize)
        } else {
            chunk_size
        };

        AdaptationDecision { degraded, chunk_size }
    }

    fn clamp(&self, bytes: usize) -> usize {
        let bytes = bytes.clamp(self.config.chunk_size_min, self.config.chunk_size_max);
        align_to_frame(bytes, self.channels)
    }
}
