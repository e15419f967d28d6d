//! Progress update emitted by the executor.

use super::StepStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One progress report: which step, what happened, and how far along the run is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// The step name.
    pub step: String,
    /// The step status.
    pub status: StepStatus,
    /// Run completion fraction in `[0, 1]`.
    pub progress: f64,
    /// Optional detail (skip reason, error message).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// When the update was produced.
    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    /// Creates a new progress update.
    #[must_use]
    pub fn new(step: impl Into<String>, status: StepStatus, progress: f64) -> Self {
        Self {
            step: step.into(),
            status,
            progress: progress.clamp(0.0, 1.0),
            detail: None,
            timestamp: Utc::now(),
        }
    }

    /// Sets the detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Sets the detail when present.
    #[must_use]
    pub fn with_optional_detail(mut self, detail: Option<String>) -> Self {
        self.detail = detail;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_clamped() {
        assert!((ProgressUpdate::new("a", StepStatus::Running, 1.7).progress - 1.0).abs() < f64::EPSILON);
        assert!(ProgressUpdate::new("a", StepStatus::Running, -0.2).progress.abs() < f64::EPSILON);
    }

    #[test]
    fn test_detail_skipped_when_absent() {
        let update = ProgressUpdate::new("fairness", StepStatus::Skipped, 0.5);
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("detail").is_none());

        let update = update.with_detail("No sensitive attribute provided");
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["detail"], "No sensitive attribute provided");
        assert_eq!(json["status"], "skipped");
    }
}
