//! Codec strategies tried by the compression engine
//!
//! Every tier implements the same `Codec` contract so the engine can walk an
//! ordered candidate list and stop at the first acceptable result.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use super::algorithm::CompressionAlgorithm;
use crate::error::CodecError;

/// A lossless byte codec for one compression tier
pub trait Codec: Send + Sync {
    fn algorithm(&self) -> CompressionAlgorithm;

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Decode at most `original_len + 1` bytes so a corrupt stream cannot
    /// inflate without bound; the caller checks the exact length.
    fn decode(&self, data: &[u8], original_len: usize) -> Result<Vec<u8>, CodecError>;
}

/// zlib stream at a fixed level; serves the `fast` and `balanced` tiers
pub struct DeflateCodec {
    algorithm: CompressionAlgorithm,
    level: u32,
}

impl DeflateCodec {
    pub fn new(algorithm: CompressionAlgorithm, level: u32) -> Self {
        Self {
            algorithm,
            level: level.min(9),
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Codec for DeflateCodec {
    fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zlib_compress(self.algorithm, data, self.level)
    }

    fn decode(&self, data: &[u8], original_len: usize) -> Result<Vec<u8>, CodecError> {
        zlib_decompress(self.algorithm, data, original_len)
    }
}

pub(crate) fn zlib_compress(
    algorithm: CompressionAlgorithm,
    data: &[u8],
    level: u32,
) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| CodecError::CompressionFailed {
            algorithm,
            reason: e.to_string(),
        })?;
    encoder.finish().map_err(|e| CodecError::CompressionFailed {
        algorithm,
        reason: e.to_string(),
    })
}

pub(crate) fn zlib_decompress(
    algorithm: CompressionAlgorithm,
    data: &[u8],
    original_len: usize,
) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(original_len);
    ZlibDecoder::new(data)
        .take(original_len as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::CorruptStream {
            algorithm,
            reason: e.to_string(),
        })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_pcm(samples: usize) -> Vec<u8> {
        (0..samples)
            .flat_map(|i| ((i as f32 * 0.01).sin() * 0.3).to_le_bytes())
            .collect()
    }

    #[test]
    fn test_deflate_round_trip() {
        let data = sine_pcm(2048);
        for (alg, level) in [
            (CompressionAlgorithm::Fast, 1),
            (CompressionAlgorithm::Balanced, 6),
        ] {
            let codec = DeflateCodec::new(alg, level);
            let encoded = codec.encode(&data).unwrap();
            assert_eq!(codec.decode(&encoded, data.len()).unwrap(), data);
        }
    }

    #[test]
    fn test_decode_is_bounded() {
        let data = vec![0u8; 64 * 1024];
        let codec = DeflateCodec::new(CompressionAlgorithm::Balanced, 6);
        let encoded = codec.encode(&data).unwrap();

        // a lying length header never yields more than one extra byte
        let decoded = codec.decode(&encoded, 100).unwrap();
        assert_eq!(decoded.len(), 101);
    }

    #[test]
    fn test_garbage_is_corrupt_stream() {
        let codec = DeflateCodec::new(CompressionAlgorithm::Fast, 1);
        let err = codec.decode(&[0xde, 0xad, 0xbe, 0xef, 0x00], 16).unwrap_err();
        assert!(err.is_integrity_failure());
    }
}
