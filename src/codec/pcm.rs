//! Lossless codec specialised for f32 PCM
//!
//! Neighbouring samples share sign, exponent and high mantissa bits, so the
//! XOR of consecutive bit patterns is mostly zero in its upper bytes. The
//! residuals are split into byte planes (all low bytes, then the next byte,
//! and so on) before deflate, which turns those zero runs into long matches.
//! Exactly reversible: no quantisation is applied.

use super::algorithm::CompressionAlgorithm;
use super::strategy::{zlib_compress, zlib_decompress, Codec};
use crate::audio::SAMPLE_WIDTH;
use crate::error::CodecError;

pub struct PcmDeltaCodec {
    level: u32,
}

impl PcmDeltaCodec {
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }
}

impl Codec for PcmDeltaCodec {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::LosslessAudio
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        if data.len() % SAMPLE_WIDTH != 0 {
            return Err(CodecError::UnsupportedPayload {
                algorithm: self.algorithm(),
                reason: format!("{} bytes is not whole f32 samples", data.len()),
            });
        }

        let planes = split_planes(data);
        zlib_compress(self.algorithm(), &planes, self.level)
    }

    fn decode(&self, data: &[u8], original_len: usize) -> Result<Vec<u8>, CodecError> {
        let planes = zlib_decompress(self.algorithm(), data, original_len)?;
        if planes.len() != original_len || planes.len() % SAMPLE_WIDTH != 0 {
            return Err(CodecError::Integrity {
                expected: original_len,
                actual: planes.len(),
            });
        }
        Ok(join_planes(&planes))
    }
}

fn split_planes(data: &[u8]) -> Vec<u8> {
    let n = data.len() / SAMPLE_WIDTH;
    let mut out = vec![0u8; data.len()];
    let mut prev = 0u32;

    for (i, chunk) in data.chunks_exact(SAMPLE_WIDTH).enumerate() {
        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let residual = (word ^ prev).to_le_bytes();
        prev = word;
        for (plane, byte) in residual.iter().enumerate() {
            out[plane * n + i] = *byte;
        }
    }
    out
}

fn join_planes(planes: &[u8]) -> Vec<u8> {
    let n = planes.len() / SAMPLE_WIDTH;
    let mut out = Vec::with_capacity(planes.len());
    let mut prev = 0u32;

    for i in 0..n {
        let residual = u32::from_le_bytes([
            planes[i],
            planes[n + i],
            planes[2 * n + i],
            planes[3 * n + i],
        ]);
        let word = residual ^ prev;
        prev = word;
        out.extend_from_slice(&word.to_le_bytes());
    }
    out
}
