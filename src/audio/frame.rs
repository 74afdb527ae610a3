//! PCM audio frames handed to the pipeline by the producer

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Width of one PCM sample on the wire (f32 little-endian)
pub const SAMPLE_WIDTH: usize = std::mem::size_of::<f32>();

/// Audio frame containing interleaved samples
///
/// Frames are immutable once built; each pipeline stage takes ownership of the
/// frame it is working on and hands it on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    /// Producer timestamp in microseconds
    timestamp: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16, timestamp: u64) -> Self {
        Self {
            samples,
            sample_rate,
            channels: channels.max(1),
            timestamp,
        }
    }

    /// Rebuild a frame from little-endian f32 PCM bytes
    pub fn from_pcm_bytes(
        data: &[u8],
        sample_rate: u32,
        channels: u16,
        timestamp: u64,
    ) -> Result<Self, AudioError> {
        if data.len() % SAMPLE_WIDTH != 0 {
            return Err(AudioError::InvalidPcm(data.len()));
        }
        if channels == 0 {
            return Err(AudioError::InvalidChannels(channels));
        }

        let samples = data
            .chunks_exact(SAMPLE_WIDTH)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Self::new(samples, sample_rate, channels, timestamp))
    }

    /// Serialize samples as little-endian f32 PCM
    pub fn to_pcm_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.byte_len());
        for sample in &self.samples {
            buf.put_f32_le(*sample);
        }
        buf.freeze()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn byte_len(&self) -> usize {
        self.samples.len() * SAMPLE_WIDTH
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Get frame duration in microseconds
    pub fn duration_us(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples_per_channel() as u64 * 1_000_000) / self.sample_rate as u64
    }
}

/// Round a byte count down to whole interleaved sample frames, never below one frame
pub fn align_to_frame(bytes: usize, channels: u16) -> usize {
    let frame = SAMPLE_WIDTH * channels.max(1) as usize;
    (bytes / frame).max(1) * frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_bytes_are_little_endian() {
        let frame = AudioFrame::new(vec![1.0, -0.5], 48000, 1, 0);
        let bytes = frame.to_pcm_bytes();

        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..], &(-0.5f32).to_le_bytes());

        let back = AudioFrame::from_pcm_bytes(&bytes, 48000, 1, 0).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_rejects_partial_samples() {
        let err = AudioFrame::from_pcm_bytes(&[0u8; 7], 48000, 1, 0).unwrap_err();
        assert_eq!(err, AudioError::InvalidPcm(7));
    }

    #[test]
    fn test_duration() {
        let frame = AudioFrame::new(vec![0.0; 960], 48000, 2, 0);
        assert_eq!(frame.samples_per_channel(), 480);
        assert_eq!(frame.duration_us(), 10_000);
    }

    #[test]
    fn test_align_to_frame() {
        assert_eq!(align_to_frame(4097, 1), 4096);
        assert_eq!(align_to_frame(4100, 2), 4096);
        assert_eq!(align_to_frame(3, 2), 8);
    }
}
