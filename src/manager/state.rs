//! Unit status
//!
//! Status is never stored. A service derives it from its process list and
//! stop timestamp; a group from its requirements:
//!
//! ```text
//!     ┌─────────┐  start   ┌─────────┐  stop   ┌──────────┐
//!     │ Stopped ├─────────►│ Running ├────────►│ Stopping │
//!     └────▲────┘          └────┬────┘         └────┬─────┘
//!          │   last process     │                   │ last process
//!          │   pruned (crash)   │                   │ pruned
//!          └────────────────────┴───────────────────┘
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Running,
    Stopping,
    Stopped,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    /// Status of a service with `processes` attributed processes
    pub fn for_service(processes: usize, stop_requested: bool) -> Self {
        match (processes, stop_requested) {
            (0, _) => Self::Stopped,
            (_, false) => Self::Running,
            (_, true) => Self::Stopping,
        }
    }

    /// Status of a group given the statuses of its requirements
    pub fn aggregate(requirements: impl IntoIterator<Item = UnitStatus>) -> Self {
        let mut any_stopping = false;
        for status in requirements {
            match status {
                Self::Running => return Self::Running,
                Self::Stopping => any_stopping = true,
                Self::Stopped => {}
            }
        }
        if any_stopping {
            Self::Stopping
        } else {
            Self::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
