//! Error types for the audio streaming pipeline

use thiserror::Error;

use crate::codec::CompressionAlgorithm;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Oldest bytes were evicted to make room. Recorded, never fatal.
    #[error("Buffer overflow: {evicted} bytes evicted")]
    BufferOverflow { evicted: usize },

    #[error("Invalid PCM payload: {0} bytes is not a whole number of f32 samples")]
    InvalidPcm(usize),

    #[error("Invalid channel count: {0}")]
    InvalidChannels(u16),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("{algorithm} compression failed: {reason}")]
    CompressionFailed {
        algorithm: CompressionAlgorithm,
        reason: String,
    },

    #[error("{algorithm} cannot encode payload: {reason}")]
    UnsupportedPayload {
        algorithm: CompressionAlgorithm,
        reason: String,
    },

    /// Decompressed data does not match what was recorded at compression time.
    #[error("Integrity check failed: expected {expected} bytes, recovered {actual}")]
    Integrity { expected: usize, actual: usize },

    #[error("Corrupt {algorithm} stream: {reason}")]
    CorruptStream {
        algorithm: CompressionAlgorithm,
        reason: String,
    },

    #[error("Unknown compression algorithm id: {0}")]
    UnknownAlgorithm(u8),
}

impl CodecError {
    /// Whether the error means a received chunk must be dropped as corrupt
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::Integrity { .. } | Self::CorruptStream { .. })
    }
}

/// Network / transport errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Connection closed")]
    Closed,

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Invalid packet format: {0}")]
    InvalidPacket(String),

    #[error("Checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Invalid control message: {0}")]
    InvalidControl(String),
}

/// Session lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Reconnect attempts capped out. Fatal for this session only.
    #[error("Session exhausted after {attempts} reconnect attempts")]
    Exhausted { attempts: u32 },

    #[error("Session already started")]
    AlreadyStarted,

    #[error("Session is stopped")]
    Stopped,

    #[error("Session is not connected")]
    NotConnected,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
