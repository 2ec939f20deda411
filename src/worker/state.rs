//! Worker lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transition history is capped to this many entries per instance.
pub const MAX_TRANSITIONS: usize = 200;

/// Lifecycle status of a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Process launched, not yet accepting work.
    Starting,
    /// Idle and accepting work.
    Ready,
    /// Handling a request.
    Busy,
    /// Failed; may be restarted or stopped.
    Error,
    /// Shut down. Terminal.
    Stopped,
}

impl WorkerStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: WorkerStatus) -> bool {
        use WorkerStatus::*;

        matches!(
            (self, target),
            // From Starting
            (Starting, Ready) | (Starting, Error) | (Starting, Stopped) |
            // From Ready
            (Ready, Busy) | (Ready, Error) | (Ready, Stopped) |
            // From Busy
            (Busy, Ready) | (Busy, Error) | (Busy, Stopped) |
            // From Error (restart or give up)
            (Error, Stopped) | (Error, Starting)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Live instances can be reused by `get_or_spawn`.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Ready | Self::Busy)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Error => "error",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// A recorded status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    /// Previous status.
    pub from: WorkerStatus,
    /// New status.
    pub to: WorkerStatus,
    /// When the transition occurred.
    pub timestamp: DateTime<Utc>,
    /// Error or note attached to the transition, if any.
    pub reason: Option<String>,
}
