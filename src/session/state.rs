//! Session lifecycle states

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Active,
    /// Link quality is poor; chunks are shrinking
    Degraded,
    Reconnecting { attempt: u32 },
    Stopped,
}

impl SessionState {
    /// Connected and streaming, healthy or not
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Active | Self::Degraded)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Active => f.write_str("active"),
            Self::Degraded => f.write_str("degraded"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}
