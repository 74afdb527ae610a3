//! Network subsystem: sequencing, reordering, clock sync, link monitoring
//! and the transports audio packets travel over

pub mod clock;
pub mod monitor;
pub mod packetizer;
pub mod reorder;
pub mod transport;
pub mod websocket;

pub use clock::{ClockSynchronizer, SyncState};
pub use monitor::{AckTracker, NetworkMonitor, NetworkStats};
pub use packetizer::{PacketMeta, Packetizer};
pub use reorder::{ReorderStats, ReorderWindow};
pub use transport::{
    memory_listener, memory_pair, Connector, FrameSink, FrameStream, MemoryConnector,
    MemoryListener, Transport, WireMessage,
};
pub use websocket::{split_socket, WsConnector};
