//! Step status enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a pipeline step.
///
/// Transitions are monotonic except `Retrying <-> Running`: a step that
/// reached `Completed` or `Error` never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step has not started yet.
    Pending,
    /// Step is currently executing.
    Running,
    /// Step passed its completion gate.
    Completed,
    /// Step failed terminally.
    Error,
    /// Step failed but will be retried.
    Retrying,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
            Self::Retrying => write!(f, "retrying"),
        }
    }
}

impl StepStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error)
    }
}
