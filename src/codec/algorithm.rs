//! Compression tiers and the network/CPU driven selection policy

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::CompressionConfig;
use crate::error::CodecError;

/// Compression algorithm identifier carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionAlgorithm {
    None,
    /// Cheapest CPU, modest ratio
    Fast,
    Balanced,
    /// Best ratio on float PCM, highest CPU
    LosslessAudio,
}

impl CompressionAlgorithm {
    pub const ALL: [CompressionAlgorithm; 4] = [
        CompressionAlgorithm::None,
        CompressionAlgorithm::Fast,
        CompressionAlgorithm::Balanced,
        CompressionAlgorithm::LosslessAudio,
    ];

    pub fn id(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Fast => 1,
            Self::Balanced => 2,
            Self::LosslessAudio => 3,
        }
    }

    pub fn from_id(id: u8) -> Result<Self, CodecError> {
        match id {
            0 => Ok(Self::None),
            1 => Ok(Self::Fast),
            2 => Ok(Self::Balanced),
            3 => Ok(Self::LosslessAudio),
            other => Err(CodecError::UnknownAlgorithm(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::LosslessAudio => "lossless-audio",
        }
    }

    /// The tier tried when this one fails
    pub fn fallback(self) -> Option<Self> {
        match self {
            Self::LosslessAudio => Some(Self::Balanced),
            Self::Balanced => Some(Self::Fast),
            Self::Fast | Self::None => None,
        }
    }

    /// This tier followed by every fallback below it
    pub fn fallback_chain(self) -> Vec<Self> {
        let mut chain = Vec::with_capacity(3);
        let mut current = Some(self).filter(|a| *a != Self::None);
        while let Some(alg) = current {
            chain.push(alg);
            current = alg.fallback();
        }
        chain
    }

    /// Minimum size reduction this tier must achieve to be worth decoding
    pub fn min_improvement(self, config: &CompressionConfig) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Fast => config.fast_min_improvement,
            Self::Balanced => config.balanced_min_improvement,
            Self::LosslessAudio => config.lossless_min_improvement,
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link and host conditions the selection policy looks at
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkConditions {
    pub bandwidth_mbps: f64,
    pub latency_ms: f64,
    pub cpu_percent: f64,
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self {
            bandwidth_mbps: 10.0,
            latency_ms: 0.0,
            cpu_percent: 0.0,
        }
    }
}

/// Pick the tier for the given conditions.
///
/// High CPU always wins; a thin link with CPU to spare gets the best ratio;
/// a slow link gets the cheapest codec; everything else is balanced.
pub fn select_algorithm(
    conditions: &NetworkConditions,
    config: &CompressionConfig,
) -> CompressionAlgorithm {
    if conditions.cpu_percent >= config.high_cpu_percent {
        CompressionAlgorithm::Fast
    } else if conditions.bandwidth_mbps < config.low_bandwidth_mbps
        && conditions.cpu_percent < config.cpu_headroom_percent
    {
        CompressionAlgorithm::LosslessAudio
    } else if conditions.latency_ms > config.high_latency_ms {
        CompressionAlgorithm::Fast
    } else {
        CompressionAlgorithm::Balanced
    }
}
