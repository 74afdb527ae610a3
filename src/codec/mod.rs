//! Lossless compression tiers
//!
//! The engine picks a tier from current network and CPU conditions, falls
//! back down the tier chain when a codec cannot handle a payload, and sends
//! the payload as-is when the result is not worth it.

pub mod algorithm;
pub mod engine;
pub mod pcm;
pub mod strategy;

pub use algorithm::{select_algorithm, CompressionAlgorithm, NetworkConditions};
pub use engine::{CalibrationReport, CalibrationSample, CompressionEngine, CompressionResult, EngineStats};
pub use pcm::PcmDeltaCodec;
pub use strategy::{Codec, DeflateCodec};
