//! Audio subsystem: frames, ingest buffering and quality analysis

pub mod buffer;
pub mod frame;
pub mod quality;

pub use buffer::{create_shared_buffer, BufferStats, FrameBuffer, SharedFrameBuffer};
pub use frame::{align_to_frame, AudioFrame, SAMPLE_WIDTH};
pub use quality::{QualityAnalyzer, QualityMetrics};
