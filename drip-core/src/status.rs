//! Lifecycle status shared by backfill runs and their batches

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a backfill run or batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStatus {
    /// Created, waiting for its commit step to enqueue it
    Pending,

    /// Submitted to the job queue
    Enqueued,

    /// Being planned (runs) or processed (batches)
    Running,

    /// Finished successfully
    Completed,

    /// Finished with an error
    Failed,

    /// Cancelled by an operator
    Stopped,
}

impl BackfillStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [BackfillStatus; 6] = [
        BackfillStatus::Pending,
        BackfillStatus::Enqueued,
        BackfillStatus::Running,
        BackfillStatus::Completed,
        BackfillStatus::Failed,
        BackfillStatus::Stopped,
    ];

    /// Storage representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Enqueued => "enqueued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Returns true if no further work happens in this status.
    ///
    /// `Failed` is terminal for runs; a failed batch may still be re-run by the queue.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Check if a transition from `self` to `target` is allowed
    pub fn can_transition_to(&self, target: Self) -> bool {
        use BackfillStatus::*;

        match (self, target) {
            (Pending, Enqueued | Failed) => true,
            (Enqueued, Running | Failed | Stopped) => true,
            (Running, Completed | Failed | Stopped) => true,
            // whole-batch retry
            (Failed, Running) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BackfillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown backfill status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for BackfillStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackfillStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl From<BackfillStatus> for String {
    fn from(status: BackfillStatus) -> Self {
        status.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_strings() {
        for status in BackfillStatus::ALL {
            assert_eq!(status.as_str().parse::<BackfillStatus>(), Ok(status));
        }
        assert!("paused".parse::<BackfillStatus>().is_err());
    }

    #[test]
    fn test_valid_transitions() {
        use BackfillStatus::*;

        assert!(Pending.can_transition_to(Enqueued));
        assert!(Enqueued.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Stopped));
        assert!(Enqueued.can_transition_to(Stopped));
        assert!(Failed.can_transition_to(Running));
    }

    #[test]
    fn test_invalid_transitions() {
        use BackfillStatus::*;

        assert!(!Pending.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(BackfillStatus::Completed.is_terminal());
        assert!(BackfillStatus::Stopped.is_terminal());
        assert!(!BackfillStatus::Running.is_terminal());
    }
}
