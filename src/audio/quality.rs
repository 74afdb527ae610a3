//! Per-frame audio quality assessment
//!
//! Metrics are cheap time-domain estimates; they feed adaptation decisions and
//! annotate chunks handed to downstream consumers.

use serde::{Deserialize, Serialize};

use super::frame::AudioFrame;

/// SNR reported for frames with no energy
pub const SNR_FLOOR_DB: f32 = -60.0;

/// Peak level at or above which a frame is flagged as clipping
pub const CLIP_THRESHOLD: f32 = 0.99;

/// Default RMS below which a frame counts as silence
pub const DEFAULT_SILENCE_THRESHOLD: f32 = 0.01;

/// Quality metrics derived from a frame's samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub rms_level: f32,
    pub peak_level: f32,
    pub zero_crossing_rate: f32,
    /// Mean absolute gradient; a brightness proxy, not an FFT centroid
    pub spectral_centroid: f32,
    pub snr_estimate_db: f32,
    pub clipping: bool,
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self {
            rms_level: 0.0,
            peak_level: 0.0,
            zero_crossing_rate: 0.0,
            spectral_centroid: 0.0,
            snr_estimate_db: SNR_FLOOR_DB,
            clipping: false,
        }
    }
}

impl QualityMetrics {
    pub fn is_silent(&self, threshold: f32) -> bool {
        self.rms_level < threshold
    }
}

/// Stateless analyzer; `analyze` is a pure function of the samples
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityAnalyzer;

impl QualityAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, frame: &AudioFrame) -> QualityMetrics {
        analyze_samples(frame.samples())
    }
}

/// Compute quality metrics over raw samples
pub fn analyze_samples(samples: &[f32]) -> QualityMetrics {
    let n = samples.len();
    if n == 0 {
        return QualityMetrics::default();
    }

    let mut sum_sq = 0.0f64;
    let mut peak = 0.0f32;
    for &x in samples {
        sum_sq += (x as f64) * (x as f64);
        peak = peak.max(x.abs());
    }
    let rms = (sum_sq / n as f64).sqrt() as f32;

    let zero_crossing_rate = if n > 1 {
        let crossings = samples
            .windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count();
        crossings as f32 / (n - 1) as f32
    } else {
        0.0
    };

    let snr_estimate_db = if rms > 0.0 {
        20.0 * (peak / rms).log10()
    } else {
        SNR_FLOOR_DB
    };

    QualityMetrics {
        rms_level: rms,
        peak_level: peak,
        zero_crossing_rate,
        spectral_centroid: mean_abs_gradient(samples),
        snr_estimate_db,
        clipping: peak >= CLIP_THRESHOLD,
    }
}

/// Central differences inside, one-sided at the edges
fn mean_abs_gradient(samples: &[f32]) -> f32 {
    let n = samples.len();
    if n < 2 {
        return 0.0;
    }

    let mut total = (samples[1] - samples[0]).abs() as f64;
    total += (samples[n - 1] - samples[n - 2]).abs() as f64;
    for i in 1..n - 1 {
        total += ((samples[i + 1] - samples[i - 1]) / 2.0).abs() as f64;
    }
    (total / n as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: Vec<f32>) -> AudioFrame {
        AudioFrame::new(samples, 16000, 1, 0)
    }

    #[test]
    fn test_silence() {
        let metrics = QualityAnalyzer::new().analyze(&frame(vec![0.0; 256]));

        assert_eq!(metrics.rms_level, 0.0);
        assert_eq!(metrics.peak_level, 0.0);
        assert_eq!(metrics.snr_estimate_db, SNR_FLOOR_DB);
        assert!(!metrics.clipping);
        assert!(metrics.is_silent(DEFAULT_SILENCE_THRESHOLD));
    }

    #[test]
    fn test_empty_frame_uses_floor() {
        let metrics = analyze_samples(&[]);
        assert_eq!(metrics, QualityMetrics::default());
    }

    #[test]
    fn test_square_wave() {
        // +0.5/-0.5 alternating: rms == peak, every step crosses zero
        let samples: Vec<f32> = (0..100).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let metrics = analyze_samples(&samples);

        assert!((metrics.rms_level - 0.5).abs() < 1e-6);
        assert!((metrics.peak_level - 0.5).abs() < 1e-6);
        assert!((metrics.zero_crossing_rate - 1.0).abs() < 1e-6);
        assert!(metrics.snr_estimate_db.abs() < 1e-4);
        assert!(!metrics.clipping);
    }

    #[test]
    fn test_signed_zeros_do_not_cross() {
        let metrics = analyze_samples(&[0.0, -0.0, 0.0, -0.0, 0.25, -0.0]);
        assert_eq!(metrics.zero_crossing_rate, 0.0);

        let metrics = analyze_samples(&[-0.0, 0.5, -0.5]);
        assert!((metrics.zero_crossing_rate - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_clipping_flag() {
        let metrics = analyze_samples(&[0.1, 0.995, -0.2]);
        assert!(metrics.clipping);
        assert!((metrics.peak_level - 0.995).abs() < 1e-6);
    }

    #[test]
    fn test_snr_uses_peak_to_rms() {
        // one spike in silence: peak/rms == sqrt(n)
        let mut samples = vec![0.0f32; 100];
        samples[50] = 1.0;
        let metrics = analyze_samples(&samples);

        assert!((metrics.snr_estimate_db - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_gradient_proxy() {
        let metrics = analyze_samples(&[0.0, 1.0, 2.0, 3.0]);
        assert!((metrics.spectral_centroid - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_deterministic() {
        let samples: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.03).sin() * 0.4).collect();
        assert_eq!(analyze_samples(&samples), analyze_samples(&samples));
    }
}
