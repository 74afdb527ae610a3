//! Adaptive compression engine
//!
//! Chooses a tier from network/CPU conditions, walks the tier's fallback chain
//! on codec failure, and refuses results that do not clear the tier's
//! minimum-improvement threshold. `compress` never fails: the worst outcome is
//! the payload sent as-is. `decompress` is strict and reports any length or
//! stream mismatch as an integrity failure.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::algorithm::{select_algorithm, CompressionAlgorithm, NetworkConditions};
use super::pcm::PcmDeltaCodec;
use super::strategy::{Codec, DeflateCodec};
use crate::config::CompressionConfig;
use crate::error::CodecError;

/// Output of one compression call
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionResult {
    pub algorithm: CompressionAlgorithm,
    pub payload: Bytes,
    /// Byte length before compression, checked on decompression
    pub original_len: usize,
    /// compressed / original
    pub ratio: f64,
}

impl CompressionResult {
    pub fn uncompressed(payload: Bytes) -> Self {
        let original_len = payload.len();
        Self {
            algorithm: CompressionAlgorithm::None,
            payload,
            original_len,
            ratio: 1.0,
        }
    }

    /// Fraction of bytes saved
    pub fn improvement(&self) -> f64 {
        1.0 - self.ratio
    }

    pub fn compressed_len(&self) -> usize {
        self.payload.len()
    }
}

/// One tier's result from a calibration run
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationSample {
    pub algorithm: CompressionAlgorithm,
    pub compressed_len: usize,
    pub ratio: f64,
    pub elapsed_us: u64,
    /// Whether the tier cleared its threshold
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub original_len: usize,
    pub samples: Vec<CalibrationSample>,
    /// Best accepted tier, `None` when nothing cleared its threshold
    pub best: CompressionAlgorithm,
}

/// Compression engine statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub chunks: BTreeMap<CompressionAlgorithm, u64>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub small_payloads: u64,
    pub threshold_rejections: u64,
    pub codec_failures: u64,
    pub integrity_failures: u64,
    pub average_ratio: f64,
    pub cpu_load_percent: f64,
    pub preferred: Option<CompressionAlgorithm>,
}

/// Share of wall time spent compressing, measured over fixed windows
struct LoadTracker {
    window: Duration,
    window_start: Instant,
    busy: Duration,
    last_percent: f64,
}

impl LoadTracker {
    fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            window_start: Instant::now(),
            busy: Duration::ZERO,
            last_percent: 0.0,
        }
    }

    fn record(&mut self, busy: Duration, now: Instant) {
        self.busy += busy;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= self.window {
            self.last_percent =
                (self.busy.as_secs_f64() / elapsed.as_secs_f64() * 100.0).clamp(0.0, 100.0);
            self.busy = Duration::ZERO;
            self.window_start = now;
        }
    }

    fn percent(&self) -> f64 {
        self.last_percent
    }
}

pub struct CompressionEngine {
    config: CompressionConfig,
    codecs: Vec<Box<dyn Codec>>,
    preferred: Mutex<Option<CompressionAlgorithm>>,
    stats: Mutex<EngineStats>,
    load: Mutex<LoadTracker>,
}

impl CompressionEngine {
    pub fn new(config: CompressionConfig) -> Self {
        let codecs: Vec<Box<dyn Codec>> = vec![
            Box::new(DeflateCodec::new(CompressionAlgorithm::Fast, config.fast_level)),
            Box::new(DeflateCodec::new(
                CompressionAlgorithm::Balanced,
                config.balanced_level,
            )),
            Box::new(PcmDeltaCodec::new(config.lossless_level)),
        ];
        let load = LoadTracker::new(Duration::from_millis(config.load_window_ms));

        Self {
            config,
            codecs,
            preferred: Mutex::new(None),
            stats: Mutex::new(EngineStats::default()),
            load: Mutex::new(load),
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    fn codec(&self, algorithm: CompressionAlgorithm) -> Option<&dyn Codec> {
        self.codecs
            .iter()
            .find(|c| c.algorithm() == algorithm)
            .map(|c| c.as_ref())
    }

    /// Tier the engine would use under `conditions`.
    /// A calibrated preference holds unless the CPU is saturated.
    pub fn select(&self, conditions: &NetworkConditions) -> CompressionAlgorithm {
        if let Some(pinned) = *self.preferred.lock() {
            if conditions.cpu_percent < self.config.high_cpu_percent {
                return pinned;
            }
        }
        select_algorithm(conditions, &self.config)
    }

    /// Select a tier for `conditions` and compress with it
    pub fn compress(&self, payload: &[u8], conditions: &NetworkConditions) -> CompressionResult {
        let algorithm = self.select(conditions);
        self.compress_with(payload, algorithm)
    }

    /// Compress starting at `algorithm`, falling back down the tiers
    pub fn compress_with(&self, payload: &[u8], algorithm: CompressionAlgorithm) -> CompressionResult {
        let started = Instant::now();
        let result = self.run_chain(payload, algorithm);
        self.load.lock().record(started.elapsed(), Instant::now());

        let mut stats = self.stats.lock();
        *stats.chunks.entry(result.algorithm).or_insert(0) += 1;
        stats.bytes_in += result.original_len as u64;
        stats.bytes_out += result.payload.len() as u64;
        if stats.bytes_in > 0 {
            stats.average_ratio = stats.bytes_out as f64 / stats.bytes_in as f64;
        }

        result
    }

    fn run_chain(&self, payload: &[u8], algorithm: CompressionAlgorithm) -> CompressionResult {
        if payload.len() < self.config.min_payload_bytes {
            self.stats.lock().small_payloads += 1;
            return CompressionResult::uncompressed(Bytes::copy_from_slice(payload));
        }

        for candidate in algorithm.fallback_chain() {
            let Some(codec) = self.codec(candidate) else {
                continue;
            };

            let encoded = match codec.encode(payload) {
                Ok(encoded) => encoded,
                Err(e) => {
                    tracing::debug!("{} failed, falling back: {}", candidate, e);
                    self.stats.lock().codec_failures += 1;
                    continue;
                }
            };

            let ratio = encoded.len() as f64 / payload.len() as f64;
            if 1.0 - ratio >= candidate.min_improvement(&self.config) {
                return CompressionResult {
                    algorithm: candidate,
                    payload: Bytes::from(encoded),
                    original_len: payload.len(),
                    ratio,
                };
            }

            tracing::trace!(
                "{} ratio {:.3} below threshold, sending uncompressed",
                candidate,
                ratio
            );
            self.stats.lock().threshold_rejections += 1;
            break;
        }

        CompressionResult::uncompressed(Bytes::copy_from_slice(payload))
    }

    pub fn decompress(&self, result: &CompressionResult) -> Result<Vec<u8>, CodecError> {
        self.decompress_parts(result.algorithm, &result.payload, result.original_len)
    }

    /// Decompress and verify the recovered length equals `original_len`
    pub fn decompress_parts(
        &self,
        algorithm: CompressionAlgorithm,
        payload: &[u8],
        original_len: usize,
    ) -> Result<Vec<u8>, CodecError> {
        let decoded = match algorithm {
            CompressionAlgorithm::None => Ok(payload.to_vec()),
            other => match self.codec(other) {
                Some(codec) => codec.decode(payload, original_len),
                None => Err(CodecError::UnknownAlgorithm(other.id())),
            },
        };

        let checked = decoded.and_then(|data| {
            if data.len() == original_len {
                Ok(data)
            } else {
                Err(CodecError::Integrity {
                    expected: original_len,
                    actual: data.len(),
                })
            }
        });

        if let Err(e) = &checked {
            if e.is_integrity_failure() {
                self.stats.lock().integrity_failures += 1;
            }
        }
        checked
    }

    /// Benchmark every tier on `sample`. Meant as an occasional calibration
    /// step, not per packet. With `pin` the best accepted tier becomes the
    /// preferred one.
    pub fn calibrate(&self, sample: &[u8], pin: bool) -> CalibrationReport {
        let mut samples = Vec::new();
        let mut best: Option<(CompressionAlgorithm, f64)> = None;

        for codec in &self.codecs {
            let algorithm = codec.algorithm();
            let started = Instant::now();
            let Ok(encoded) = codec.encode(sample) else {
                continue;
            };
            let elapsed_us = started.elapsed().as_micros() as u64;

            let ratio = if sample.is_empty() {
                1.0
            } else {
                encoded.len() as f64 / sample.len() as f64
            };
            let accepted = 1.0 - ratio >= algorithm.min_improvement(&self.config);
            if accepted && best.map_or(true, |(_, r)| ratio < r) {
                best = Some((algorithm, ratio));
            }

            samples.push(CalibrationSample {
                algorithm,
                compressed_len: encoded.len(),
                ratio,
                elapsed_us,
                accepted,
            });
        }

        let best = best.map(|(a, _)| a).unwrap_or(CompressionAlgorithm::None);
        if pin {
            self.pin_preferred((best != CompressionAlgorithm::None).then_some(best));
        }
        tracing::info!("Compression calibration on {} bytes: best {}", sample.len(), best);

        CalibrationReport {
            original_len: sample.len(),
            samples,
            best,
        }
    }

    pub fn pin_preferred(&self, algorithm: Option<CompressionAlgorithm>) {
        *self.preferred.lock() = algorithm;
    }

    /// Share of wall time spent compressing over the last full window
    pub fn cpu_load_percent(&self) -> f64 {
        self.load.lock().percent()
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = self.stats.lock().clone();
        stats.cpu_load_percent = self.cpu_load_percent();
        stats.preferred = *self.preferred.lock();
        stats
    }
}

impl Default for CompressionEngine {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 8-bit quantised sine, typical of upsampled low-resolution capture
    fn sine_pcm(samples: usize) -> Vec<u8> {
        (0..samples)
            .flat_map(|i| {
                let s = ((i as f32 * 0.02).sin() * 0.5 * 128.0).round() / 128.0;
                s.to_le_bytes()
            })
            .collect()
    }

    /// Deterministic bytes that deflate cannot shrink
    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn test_round_trip_every_tier() {
        let engine = CompressionEngine::default();
        let payloads = [vec![0u8; 4096], sine_pcm(1024), noise(4096)];

        for payload in &payloads {
            for alg in CompressionAlgorithm::ALL {
                let result = engine.compress_with(payload, alg);
                assert_eq!(&engine.decompress(&result).unwrap(), payload);
            }
        }
    }

    #[test]
    fn test_small_payload_is_never_compressed() {
        let engine = CompressionEngine::default();
        let result = engine.compress_with(&[0u8; 100], CompressionAlgorithm::Balanced);

        assert_eq!(result.algorithm, CompressionAlgorithm::None);
        assert_eq!(result.payload.len(), 100);
        assert_eq!(engine.stats().small_payloads, 1);
    }

    #[test]
    fn test_threshold_forces_none() {
        let engine = CompressionEngine::default();
        let payload = noise(4096);

        for alg in [
            CompressionAlgorithm::Fast,
            CompressionAlgorithm::Balanced,
            CompressionAlgorithm::LosslessAudio,
        ] {
            let result = engine.compress_with(&payload, alg);
            assert_eq!(result.algorithm, CompressionAlgorithm::None);
            assert_eq!(result.payload.as_ref(), payload.as_slice());
            assert_eq!(result.ratio, 1.0);
        }
        assert_eq!(engine.stats().threshold_rejections, 3);
    }

    #[test]
    fn test_strict_threshold_rejects_good_ratio() {
        let config = CompressionConfig {
            balanced_min_improvement: 0.999,
            ..Default::default()
        };
        let engine = CompressionEngine::new(config);
        let result = engine.compress_with(&sine_pcm(2048), CompressionAlgorithm::Balanced);
        assert_eq!(result.algorithm, CompressionAlgorithm::None);
    }

    #[test]
    fn test_silence_compresses() {
        let engine = CompressionEngine::default();
        let result = engine.compress_with(&vec![0u8; 4096], CompressionAlgorithm::Fast);

        assert_eq!(result.algorithm, CompressionAlgorithm::Fast);
        assert!(result.improvement() >= 0.10);
        assert_eq!(result.original_len, 4096);
    }

    #[test]
    fn test_lossless_falls_back_on_odd_length() {
        let engine = CompressionEngine::default();
        let payload = vec![0u8; 4097];
        let result = engine.compress_with(&payload, CompressionAlgorithm::LosslessAudio);

        assert_eq!(result.algorithm, CompressionAlgorithm::Balanced);
        assert_eq!(engine.stats().codec_failures, 1);
        assert_eq!(engine.decompress(&result).unwrap(), payload);
    }

    #[test]
    fn test_length_mismatch_is_integrity_error() {
        let engine = CompressionEngine::default();
        let mut result = engine.compress_with(&vec![0u8; 4096], CompressionAlgorithm::Balanced);
        result.original_len = 4000;

        let err = engine.decompress(&result).unwrap_err();
        assert!(err.is_integrity_failure());

        let raw = CompressionResult {
            algorithm: CompressionAlgorithm::None,
            payload: Bytes::from_static(&[1, 2, 3]),
            original_len: 4,
            ratio: 1.0,
        };
        assert_eq!(
            engine.decompress(&raw).unwrap_err(),
            CodecError::Integrity {
                expected: 4,
                actual: 3
            }
        );
        assert_eq!(engine.stats().integrity_failures, 2);
    }

    #[test]
    fn test_corrupted_payload_is_rejected() {
        let engine = CompressionEngine::default();
        let result = engine.compress_with(&sine_pcm(1024), CompressionAlgorithm::Balanced);
        assert_eq!(result.algorithm, CompressionAlgorithm::Balanced);

        let mut bytes = result.payload.to_vec();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        let corrupted = CompressionResult {
            payload: Bytes::from(bytes),
            ..result
        };

        match engine.decompress(&corrupted) {
            Ok(data) => assert_ne!(data, sine_pcm(1024)),
            Err(e) => assert!(e.is_integrity_failure()),
        }
    }

    #[test]
    fn test_compress_uses_policy() {
        let engine = CompressionEngine::default();
        let busy = NetworkConditions {
            bandwidth_mbps: 10.0,
            latency_ms: 20.0,
            cpu_percent: 95.0,
        };
        let result = engine.compress(&vec![0u8; 4096], &busy);
        assert_eq!(result.algorithm, CompressionAlgorithm::Fast);
    }

    #[test]
    fn test_calibration_pins_best_tier() {
        let engine = CompressionEngine::default();
        let report = engine.calibrate(&sine_pcm(4096), true);

        assert_eq!(report.samples.len(), 3);
        assert_ne!(report.best, CompressionAlgorithm::None);
        assert_eq!(engine.stats().preferred, Some(report.best));

        let calm = NetworkConditions::default();
        assert_eq!(engine.select(&calm), report.best);

        let busy = NetworkConditions {
            cpu_percent: 99.0,
            ..calm
        };
        assert_eq!(engine.select(&busy), CompressionAlgorithm::Fast);
    }

    #[test]
    fn test_load_tracker_window() {
        let mut tracker = LoadTracker::new(Duration::from_millis(100));
        let start = tracker.window_start;

        tracker.record(Duration::from_millis(10), start + Duration::from_millis(50));
        assert_eq!(tracker.percent(), 0.0);

        tracker.record(Duration::from_millis(15), start + Duration::from_millis(100));
        assert!((tracker.percent() - 25.0).abs() < 1e-6);
    }
}
