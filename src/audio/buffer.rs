//! Bounded byte buffer absorbing bursty producer writes
//!
//! The producer path writes PCM bytes while the drain path reads fixed-size
//! chunks for compression. When a write would exceed the capacity, the oldest
//! bytes are evicted first. Losing stale audio is preferred over blocking the
//! producer.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::AudioError;

struct Inner {
    data: VecDeque<u8>,
    overflow_count: u64,
    overflow_events: u64,
    total_written: u64,
    total_read: u64,
}

/// Fixed-capacity FIFO byte store with drop-oldest overflow
pub struct FrameBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    /// Optional overflow notification for backpressure signaling
    overflow_tx: Option<Sender<AudioError>>,
}

impl FrameBuffer {
    /// Create a new buffer holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                data: VecDeque::with_capacity(capacity),
                overflow_count: 0,
                overflow_events: 0,
                total_written: 0,
                total_read: 0,
            }),
            capacity,
            overflow_tx: None,
        }
    }

    /// Report each overflow as an `AudioError::BufferOverflow` on `tx`.
    /// Notifications are sent with `try_send` and dropped if the receiver lags.
    pub fn with_overflow_notifier(mut self, tx: Sender<AudioError>) -> Self {
        self.overflow_tx = Some(tx);
        self
    }

    /// Append bytes, evicting the oldest data if needed.
    ///
    /// Returns `true` when every byte of `data` was retained. A write larger
    /// than the capacity keeps only its newest `capacity` bytes and returns
    /// `false`; so does an empty write.
    pub fn write(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            return false;
        }

        let (accepted, evicted) = {
            let mut inner = self.inner.lock();
            inner.total_written += data.len() as u64;

            let (kept, mut evicted) = if data.len() > self.capacity {
                (&data[data.len() - self.capacity..], data.len() - self.capacity)
            } else {
                (data, 0)
            };

            let overflow = (inner.data.len() + kept.len()).saturating_sub(self.capacity);
            if overflow > 0 {
                inner.data.drain(..overflow);
                evicted += overflow;
            }
            inner.data.extend(kept);

            if evicted > 0 {
                inner.overflow_count += evicted as u64;
                inner.overflow_events += 1;
            }

            (kept.len() == data.len(), evicted)
        };

        if evicted > 0 {
            tracing::debug!("Frame buffer overflow: {} bytes evicted", evicted);
            if let Some(tx) = &self.overflow_tx {
                let _ = tx.try_send(AudioError::BufferOverflow { evicted });
            }
        }

        accepted
    }

    /// Drain up to `max_bytes` from the front. Never blocks.
    pub fn read(&self, max_bytes: usize) -> Vec<u8> {
        let mut inner = self.inner.lock();
        let n = max_bytes.min(inner.data.len());
        let out: Vec<u8> = inner.data.drain(..n).collect();
        inner.total_read += n as u64;
        out
    }

    /// Drain exactly `len` bytes, or nothing if fewer are buffered
    pub fn read_exact(&self, len: usize) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        if len == 0 || inner.data.len() < len {
            return None;
        }
        let out: Vec<u8> = inner.data.drain(..len).collect();
        inner.total_read += len as u64;
        Some(out)
    }

    /// Bytes currently buffered
    pub fn available(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().data.is_empty()
    }

    /// Discard all buffered bytes. Counters are kept.
    pub fn clear(&self) {
        self.inner.lock().data.clear();
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.available() as f32 / self.capacity as f32
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.lock();
        BufferStats {
            size: inner.data.len(),
            capacity: self.capacity,
            overflow_count: inner.overflow_count,
            overflow_events: inner.overflow_events,
            total_written: inner.total_written,
            total_read: inner.total_read,
            utilization: inner.data.len() as f32 / self.capacity as f32,
        }
    }
}

/// Thread-safe handle to a frame buffer
pub type SharedFrameBuffer = Arc<FrameBuffer>;

/// Create a new shared frame buffer
pub fn create_shared_buffer(capacity: usize) -> SharedFrameBuffer {
    Arc::new(FrameBuffer::new(capacity))
}

/// Frame buffer statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct BufferStats {
    pub size: usize,
    pub capacity: usize,
    /// Total bytes evicted
    pub overflow_count: u64,
    /// Number of writes that caused an eviction
    pub overflow_events: u64,
    pub total_written: u64,
    pub total_read: u64,
    pub utilization: f32,
}
