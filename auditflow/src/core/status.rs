//! Step status and stage classification enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a stage's failure aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageClass {
    /// A failure aborts the run.
    #[default]
    Required,
    /// A failure is logged and recorded; the run continues.
    Advisory,
}

impl fmt::Display for StageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "required"),
            Self::Advisory => write!(f, "advisory"),
        }
    }
}

/// The status carried by a progress update for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step has started.
    Running,
    /// The step finished and merged its output.
    Completed,
    /// The step did not do its work (no input for it, or routed around).
    Skipped,
    /// The step failed.
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StepStatus {
    /// Returns true if the step will not report again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_status_display() {
        assert_eq!(StepStatus::Running.to_string(), "running");
        assert_eq!(StepStatus::Completed.to_string(), "completed");
        assert_eq!(StepStatus::Skipped.to_string(), "skipped");
        assert_eq!(StepStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_step_status_terminal() {
        assert!(!StepStatus::Running.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&StepStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");

        let class: StageClass = serde_json::from_str("\"advisory\"").unwrap();
        assert_eq!(class, StageClass::Advisory);
        assert_eq!(StageClass::default(), StageClass::Required);
    }
}
