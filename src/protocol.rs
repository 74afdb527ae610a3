//! Wire protocol
//!
//! Audio travels as self-describing binary frames:
//!
//! ```text
//! ┌───────┬─────────┬────────────┬──────────────────┬─────────────┐
//! │ "AS"  │ version │ header len │ bincode header   │ payload     │
//! │ 2 B   │ 1 B     │ u16 LE     │ PacketHeader     │ header.len  │
//! └───────┴─────────┴────────────┴──────────────────┴─────────────┘
//! ```
//!
//! Control traffic is JSON text tagged by `type`.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::CompressionAlgorithm;
use crate::constants::MAX_CHUNK_BYTES;
use crate::error::NetworkError;

pub const MAGIC: [u8; 2] = *b"AS";
pub const PROTOCOL_VERSION: u8 = 1;

/// magic + version + header length
const PREAMBLE_LEN: usize = 5;

/// Sender wall clock in microseconds since the Unix epoch
pub fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

pub fn us_to_secs(us: i64) -> f64 {
    us as f64 / 1_000_000.0
}

pub fn payload_checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

#[derive(Debug, Serialize, Deserialize)]
struct PacketHeader {
    sequence: u64,
    sent_at_us: i64,
    captured_at_us: u64,
    sample_rate: u32,
    channels: u16,
    algorithm: u8,
    original_len: u32,
    payload_len: u32,
    checksum: u32,
}

/// One chunk of (possibly compressed) audio on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPacket {
    pub sequence: u64,
    pub sent_at_us: i64,
    pub captured_at_us: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub algorithm: CompressionAlgorithm,
    /// Payload length before compression
    pub original_len: usize,
    /// CRC-32 of `payload`
    pub checksum: u32,
    pub payload: Bytes,
}

impl AudioPacket {
    pub fn verify_checksum(&self) -> Result<(), NetworkError> {
        let actual = payload_checksum(&self.payload);
        if actual == self.checksum {
            Ok(())
        } else {
            Err(NetworkError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            })
        }
    }

    /// Serialize into one binary frame
    pub fn encode(&self, max_size: usize) -> Result<Bytes, NetworkError> {
        let header = PacketHeader {
            sequence: self.sequence,
            sent_at_us: self.sent_at_us,
            captured_at_us: self.captured_at_us,
            sample_rate: self.sample_rate,
            channels: self.channels,
            algorithm: self.algorithm.id(),
            original_len: u32::try_from(self.original_len)
                .map_err(|_| NetworkError::PacketTooLarge(self.original_len))?,
            payload_len: u32::try_from(self.payload.len())
                .map_err(|_| NetworkError::PacketTooLarge(self.payload.len()))?,
            checksum: self.checksum,
        };
        let header = bincode::serialize(&header)
            .map_err(|e| NetworkError::InvalidPacket(e.to_string()))?;

        let total = PREAMBLE_LEN + header.len() + self.payload.len();
        if total > max_size {
            return Err(NetworkError::PacketTooLarge(total));
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_slice(&MAGIC);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u16_le(header.len() as u16);
        buf.put_slice(&header);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Parse and checksum-verify one binary frame
    pub fn decode(frame: &[u8], max_size: usize) -> Result<Self, NetworkError> {
        Self::decode_limited(frame, max_size, MAX_CHUNK_BYTES)
    }

    /// As [`decode`](Self::decode), also rejecting packets that declare a
    /// decompressed length above `max_chunk`
    pub fn decode_limited(frame: &[u8], max_size: usize, max_chunk: usize) -> Result<Self, NetworkError> {
        if frame.len() > max_size {
            return Err(NetworkError::PacketTooLarge(frame.len()));
        }
        if frame.len() < PREAMBLE_LEN {
            return Err(NetworkError::InvalidPacket(format!(
                "frame of {} bytes is shorter than the preamble",
                frame.len()
            )));
        }
        if frame[..2] != MAGIC {
            return Err(NetworkError::InvalidPacket("bad magic".into()));
        }
        if frame[2] != PROTOCOL_VERSION {
            return Err(NetworkError::InvalidPacket(format!(
                "unsupported protocol version {}",
                frame[2]
            )));
        }

        let header_len = u16::from_le_bytes([frame[3], frame[4]]) as usize;
        let body = &frame[PREAMBLE_LEN..];
        if body.len() < header_len {
            return Err(NetworkError::InvalidPacket("truncated header".into()));
        }

        let header: PacketHeader = bincode::deserialize(&body[..header_len])
            .map_err(|e| NetworkError::InvalidPacket(e.to_string()))?;
        let payload = &body[header_len..];
        if payload.len() != header.payload_len as usize {
            return Err(NetworkError::InvalidPacket(format!(
                "payload length {} does not match header {}",
                payload.len(),
                header.payload_len
            )));
        }
        if header.original_len as usize > max_chunk {
            return Err(NetworkError::InvalidPacket(format!(
                "declared chunk of {} bytes exceeds {}",
                header.original_len, max_chunk
            )));
        }
        let algorithm = CompressionAlgorithm::from_id(header.algorithm)
            .map_err(|e| NetworkError::InvalidPacket(e.to_string()))?;

        let packet = Self {
            sequence: header.sequence,
            sent_at_us: header.sent_at_us,
            captured_at_us: header.captured_at_us,
            sample_rate: header.sample_rate,
            channels: header.channels,
            algorithm,
            original_len: header.original_len as usize,
            checksum: header.checksum,
            payload: Bytes::copy_from_slice(payload),
        };
        packet.verify_checksum()?;
        Ok(packet)
    }
}

/// JSON control messages exchanged alongside audio frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Announces a new logical stream; sequence numbers restart at 0
    Hello {
        stream_id: Uuid,
        sample_rate: u32,
        channels: u16,
    },
    Ack {
        sequence: u64,
        sent_at_us: i64,
        received_at_us: i64,
    },
    SyncRequest {
        client_time_us: i64,
    },
    SyncResponse {
        client_time_us: i64,
        server_time_us: i64,
    },
}

impl ControlMessage {
    pub fn to_json(&self) -> Result<String, NetworkError> {
        serde_json::to_string(self).map_err(|e| NetworkError::InvalidControl(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, NetworkError> {
        serde_json::from_str(text).map_err(|e| NetworkError::InvalidControl(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_PACKET_SIZE;

    fn packet(payload: &'static [u8]) -> AudioPacket {
        AudioPacket {
            sequence: 42,
            sent_at_us: 1_700_000_000_000_000,
            captured_at_us: 123_456,
            sample_rate: 16000,
            channels: 1,
            algorithm: CompressionAlgorithm::Balanced,
            original_len: 4096,
            checksum: payload_checksum(payload),
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn test_frame_round_trip() {
        let original = packet(b"compressed bytes");
        let frame = original.encode(MAX_PACKET_SIZE).unwrap();

        assert_eq!(&frame[..2], b"AS");
        assert_eq!(AudioPacket::decode(&frame, MAX_PACKET_SIZE).unwrap(), original);
    }

    #[test]
    fn test_corrupted_payload_fails_checksum() {
        let frame = packet(b"compressed bytes").encode(MAX_PACKET_SIZE).unwrap();
        let mut bytes = frame.to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let err = AudioPacket::decode(&bytes, MAX_PACKET_SIZE).unwrap_err();
        assert!(matches!(err, NetworkError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_rejects_malformed_frames() {
        let frame = packet(b"payload").encode(MAX_PACKET_SIZE).unwrap();

        assert!(AudioPacket::decode(&frame[..3], MAX_PACKET_SIZE).is_err());
        assert!(AudioPacket::decode(&frame[..frame.len() - 1], MAX_PACKET_SIZE).is_err());

        let mut bad_magic = frame.to_vec();
        bad_magic[0] = b'X';
        assert!(matches!(
            AudioPacket::decode(&bad_magic, MAX_PACKET_SIZE),
            Err(NetworkError::InvalidPacket(_))
        ));

        let mut bad_version = frame.to_vec();
        bad_version[2] = 9;
        assert!(AudioPacket::decode(&bad_version, MAX_PACKET_SIZE).is_err());
    }

    #[test]
    fn test_size_limit() {
        let original = packet(b"0123456789");
        assert!(matches!(
            original.encode(16),
            Err(NetworkError::PacketTooLarge(_))
        ));

        let frame = original.encode(MAX_PACKET_SIZE).unwrap();
        assert!(matches!(
            AudioPacket::decode(&frame, 16),
            Err(NetworkError::PacketTooLarge(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_declared_length() {
        let mut bomb = packet(b"tiny payload");
        bomb.original_len = 256 << 20;
        let frame = bomb.encode(MAX_PACKET_SIZE).unwrap();

        assert!(matches!(
            AudioPacket::decode(&frame, MAX_PACKET_SIZE),
            Err(NetworkError::InvalidPacket(_))
        ));
        assert!(matches!(
            AudioPacket::decode_limited(&frame, MAX_PACKET_SIZE, 8192),
            Err(NetworkError::InvalidPacket(_))
        ));

        let frame = packet(b"tiny payload").encode(MAX_PACKET_SIZE).unwrap();
        assert!(AudioPacket::decode_limited(&frame, MAX_PACKET_SIZE, 4096).is_ok());
        assert!(matches!(
            AudioPacket::decode_limited(&frame, MAX_PACKET_SIZE, 4095),
            Err(NetworkError::InvalidPacket(_))
        ));
    }

    #[test]
    fn test_control_json_is_tagged() {
        let msg = ControlMessage::SyncRequest { client_time_us: 5 };
        let json = msg.to_json().unwrap();
        assert_eq!(json, r#"{"type":"sync_request","client_time_us":5}"#);
        assert_eq!(ControlMessage::from_json(&json).unwrap(), msg);

        let ack = ControlMessage::from_json(
            r#"{"type":"ack","sequence":3,"sent_at_us":10,"received_at_us":20}"#,
        )
        .unwrap();
        assert_eq!(
            ack,
            ControlMessage::Ack {
                sequence: 3,
                sent_at_us: 10,
                received_at_us: 20
            }
        );

        assert!(matches!(
            ControlMessage::from_json(r#"{"type":"launch"}"#),
            Err(NetworkError::InvalidControl(_))
        ));
    }
}
