//! Job states, snapshots and stream events.

use crate::core::{ProgressUpdate, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Externally visible job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Submitted, not yet picked up.
    Pending,
    /// A worker has started the pipeline.
    Running,
    /// The pipeline has reported at least one step.
    Progress,
    /// Finished and persisted.
    Success,
    /// Aborted; the error is recorded.
    Failure,
}

impl JobState {
    /// Returns true for `Success` and `Failure`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Progress => "PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }

    /// Whether a job in `self` may move to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => !matches!(next, Self::Pending | Self::Running),
            Self::Progress => !matches!(next, Self::Pending | Self::Running),
            Self::Success | Self::Failure => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The latest step a running job reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepProgress {
    /// Step name.
    pub step: String,
    /// Step status.
    pub status: StepStatus,
    /// Completion fraction.
    pub progress: f64,
    /// Optional detail.
    pub detail: Option<String>,
}

impl From<ProgressUpdate> for StepProgress {
    fn from(update: ProgressUpdate) -> Self {
        Self {
            step: update.step,
            status: update.status,
            progress: update.progress,
            detail: update.detail,
        }
    }
}

/// A job's lifecycle, with the data each state carries.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPhase {
    /// Waiting for a worker.
    Pending,
    /// A worker picked the job up.
    Running,
    /// The pipeline reported a step.
    Progress(StepProgress),
    /// The audit finished and was persisted.
    Success {
        /// The response body of the run, with the analysis id.
        result: Value,
        /// Id of the persisted analysis.
        analysis_id: i64,
    },
    /// The audit failed.
    Failure {
        /// Bounded, human-readable error.
        error: String,
        /// Error classification.
        error_type: String,
        /// Step that failed, if known.
        step: Option<String>,
        /// Progress reached before failing.
        progress: Option<f64>,
    },
}

impl JobPhase {
    /// The externally visible state.
    #[must_use]
    pub fn state(&self) -> JobState {
        match self {
            Self::Pending => JobState::Pending,
            Self::Running => JobState::Running,
            Self::Progress(_) => JobState::Progress,
            Self::Success { .. } => JobState::Success,
            Self::Failure { .. } => JobState::Failure,
        }
    }

    /// Progress fraction carried by the phase.
    #[must_use]
    pub fn progress(&self) -> Option<f64> {
        match self {
            Self::Pending | Self::Running => Some(0.0),
            Self::Progress(step) => Some(step.progress),
            Self::Success { .. } => Some(1.0),
            Self::Failure { progress, .. } => *progress,
        }
    }
}

/// A stored job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    /// Job id.
    pub job_id: String,
    /// Current phase.
    pub phase: JobPhase,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Creates a pending record.
    #[must_use]
    pub fn new(job_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            phase: JobPhase::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Renders the record for clients.
    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        let mut snapshot = JobSnapshot {
            job_id: self.job_id.clone(),
            state: self.phase.state(),
            progress: self.phase.progress(),
            step: None,
            status: None,
            detail: None,
            error: None,
            error_type: None,
            result: None,
            analysis_id: None,
        };
        match &self.phase {
            JobPhase::Pending => snapshot.status = Some("queued".to_string()),
            JobPhase::Running => snapshot.status = Some("started".to_string()),
            JobPhase::Progress(step) => {
                snapshot.step = Some(step.step.clone());
                snapshot.status = Some(step.status.to_string());
                snapshot.detail.clone_from(&step.detail);
            }
            JobPhase::Success {
                result,
                analysis_id,
            } => {
                snapshot.status = Some("completed".to_string());
                snapshot.result = Some(result.clone());
                snapshot.analysis_id = Some(*analysis_id);
            }
            JobPhase::Failure {
                error,
                error_type,
                step,
                ..
            } => {
                snapshot.status = Some("failed".to_string());
                snapshot.step.clone_from(step);
                snapshot.error = Some(error.clone());
                snapshot.error_type = Some(error_type.clone());
            }
        }
        snapshot
    }
}

/// What a client sees when it asks for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Job id.
    pub job_id: String,
    /// Current state.
    pub state: JobState,
    /// Completion fraction in `[0, 1]`.
    pub progress: Option<f64>,
    /// Current or failing step.
    pub step: Option<String>,
    /// Human-readable status.
    pub status: Option<String>,
    /// Optional detail for the current step.
    pub detail: Option<String>,
    /// Bounded error message on failure.
    pub error: Option<String>,
    /// Error classification on failure.
    pub error_type: Option<String>,
    /// Final result on success.
    pub result: Option<Value>,
    /// Persisted analysis id on success.
    pub analysis_id: Option<i64>,
}

impl JobSnapshot {
    /// Returns true once the job can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// One item of a job's event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// The snapshot changed.
    Status(JobSnapshot),
    /// The job reached a terminal state; the stream ends after this.
    Done(JobSnapshot),
}

impl JobEvent {
    /// Event name on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Done(_) => "done",
        }
    }

    /// The carried snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &JobSnapshot {
        match self {
            Self::Status(snapshot) | Self::Done(snapshot) => snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_transitions() {
        assert!(JobState::Pending.can_transition_to(JobState::Running));
        assert!(JobState::Pending.can_transition_to(JobState::Failure));
        assert!(JobState::Running.can_transition_to(JobState::Progress));
        assert!(JobState::Progress.can_transition_to(JobState::Progress));
        assert!(!JobState::Progress.can_transition_to(JobState::Running));
        assert!(!JobState::Success.can_transition_to(JobState::Failure));
        assert!(!JobState::Failure.can_transition_to(JobState::Progress));
    }

    #[test]
    fn test_state_wire_names() {
        assert_eq!(serde_json::to_value(JobState::Progress).unwrap(), json!("PROGRESS"));
        assert_eq!(JobState::Success.to_string(), "SUCCESS");
    }

    #[test]
    fn test_progress_snapshot() {
        let mut record = JobRecord::new("job-1");
        record.phase = JobPhase::Progress(StepProgress {
            step: "fairness".to_string(),
            status: StepStatus::Skipped,
            progress: 0.556,
            detail: Some("No sensitive attribute provided".to_string()),
        });

        let snapshot = record.snapshot();
        assert_eq!(snapshot.state, JobState::Progress);
        assert_eq!(snapshot.step.as_deref(), Some("fairness"));
        assert_eq!(snapshot.status.as_deref(), Some("skipped"));
        assert_eq!(snapshot.progress, Some(0.556));
        assert!(snapshot.result.is_none());
    }

    #[test]
    fn test_failure_snapshot_keeps_last_progress() {
        let mut record = JobRecord::new("job-2");
        record.phase = JobPhase::Failure {
            error: "Stage 'xai' failed: boom".to_string(),
            error_type: "UpstreamError".to_string(),
            step: Some("xai".to_string()),
            progress: Some(0.2),
        };

        let snapshot = record.snapshot();
        assert!(snapshot.is_terminal());
        assert_eq!(snapshot.progress, Some(0.2));
        assert_eq!(snapshot.error_type.as_deref(), Some("UpstreamError"));
        assert_eq!(snapshot.status.as_deref(), Some("failed"));
    }

    #[test]
    fn test_event_names() {
        let snapshot = JobRecord::new("job-3").snapshot();
        assert_eq!(JobEvent::Status(snapshot.clone()).name(), "status");
        assert_eq!(JobEvent::Done(snapshot.clone()).snapshot(), &snapshot);
    }
}
