//! Send-side sequencing

use crate::codec::CompressionResult;
use crate::protocol::{now_us, payload_checksum, AudioPacket};

/// Stream format stamped onto every packet
#[derive(Debug, Clone, Copy)]
pub struct PacketMeta {
    pub captured_at_us: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Assigns monotonically increasing sequence numbers, starting at 0
#[derive(Debug, Default)]
pub struct Packetizer {
    next_sequence: u64,
}

impl Packetizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packetize(&mut self, result: CompressionResult, meta: &PacketMeta) -> AudioPacket {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        AudioPacket {
            sequence,
            sent_at_us: now_us(),
            captured_at_us: meta.captured_at_us,
            sample_rate: meta.sample_rate,
            channels: meta.channels,
            algorithm: result.algorithm,
            original_len: result.original_len,
            checksum: payload_checksum(&result.payload),
            payload: result.payload,
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Start a new logical stream
    pub fn reset(&mut self) {
        self.next_sequence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_sequences_are_monotonic() {
        let mut packetizer = Packetizer::new();
        let meta = PacketMeta {
            captured_at_us: 0,
            sample_rate: 16000,
            channels: 1,
        };

        let seqs: Vec<u64> = (0..5)
            .map(|_| {
                let result = CompressionResult::uncompressed(Bytes::from_static(b"abcd"));
                packetizer.packetize(result, &meta).sequence
            })
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);

        packetizer.reset();
        let packet = packetizer.packetize(CompressionResult::uncompressed(Bytes::new()), &meta);
        assert_eq!(packet.sequence, 0);
    }

    #[test]
    fn test_checksum_covers_payload() {
        let mut packetizer = Packetizer::new();
        let meta = PacketMeta {
            captured_at_us: 7,
            sample_rate: 48000,
            channels: 2,
        };
        let packet = packetizer.packetize(
            CompressionResult::uncompressed(Bytes::from_static(b"payload")),
            &meta,
        );

        assert!(packet.verify_checksum().is_ok());
        assert_eq!(packet.original_len, 7);
        assert!(packet.sent_at_us > 0);
    }
}
