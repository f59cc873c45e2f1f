use serde::{Deserialize, Serialize};
use std::fmt;

pub mod snapshot;

pub use snapshot::*;

/// Identity of one monitored multicast feed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamTarget {
    /// Multicast address and port, e.g. `233.198.134.1:3333`
    pub address: String,
    pub description: String,
    /// Local interface the analyzer joins the group on
    pub interface: String,
}

impl StreamTarget {
    pub fn new(
        address: impl Into<String>,
        description: impl Into<String>,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            description: description.into(),
            interface: interface.into(),
        }
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.description)
    }
}

/// Lifecycle state of a stream supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    ExitedClean,
    ExitedError,
    Cancelled,
    Restarting,
    Stopped,
}

impl SupervisorState {
    /// Whether the supervision loop is active in this state
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Stopped)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ExitedClean => "exited_clean",
            Self::ExitedError => "exited_error",
            Self::Cancelled => "cancelled",
            Self::Restarting => "restarting",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}
