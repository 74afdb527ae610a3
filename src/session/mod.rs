//! Stream sessions: one per logical connection, plus the registry that
//! tracks them for the status API

pub mod adapt;
pub mod events;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod session;
pub mod state;

pub use adapt::{AdaptationDecision, AdaptationPolicy};
pub use events::SessionEvent;
pub use registry::{RegistryCounters, RegistryStatus, SessionRegistry};
pub use session::{DecodedChunk, Direction, SessionCounters, SessionOutcome, SessionSnapshot, StreamSession};
pub use state::SessionState;
