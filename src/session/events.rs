//! Session events broadcast to observers

use serde::Serialize;
use uuid::Uuid;

use super::state::SessionState;
use crate::codec::CompressionAlgorithm;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    Connected {
        stream_id: Uuid,
    },
    Disconnected {
        reason: String,
    },
    ReconnectAttempt {
        attempt: u32,
        delay_secs: u64,
    },
    /// Reconnect attempts ran out; the session has stopped
    Exhausted {
        attempts: u32,
    },
    ChunkSizeChanged {
        from: usize,
        to: usize,
    },
    AlgorithmChanged {
        from: CompressionAlgorithm,
        to: CompressionAlgorithm,
    },
    BufferOverflow {
        evicted: usize,
    },
    IntegrityFailure {
        sequence: u64,
    },
}
