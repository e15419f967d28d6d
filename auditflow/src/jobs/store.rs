//! Job state storage.

use super::state::{JobPhase, JobRecord, JobSnapshot};
use crate::errors::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt::Debug;

/// Where job state lives between the worker and the status readers.
///
/// Implementations enforce the lifecycle: transitions follow
/// `PENDING → RUNNING/PROGRESS → SUCCESS/FAILURE`, progress never decreases,
/// and a terminal job never changes again.
#[async_trait]
pub trait JobStore: Send + Sync + Debug {
    /// Registers a new pending job.
    async fn create(&self, job_id: &str) -> Result<JobSnapshot, StoreError>;

    /// Returns the latest snapshot, or `None` for an unknown id.
    async fn get(&self, job_id: &str) -> Result<Option<JobSnapshot>, StoreError>;

    /// Moves a job to `phase`.
    async fn transition(&self, job_id: &str, phase: JobPhase) -> Result<JobSnapshot, StoreError>;
}

/// A job store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<String, JobRecord>,
}

impl InMemoryJobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs ever submitted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if no job was submitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Raises the phase's progress to at least `floor`.
fn clamp_progress(phase: JobPhase, floor: Option<f64>) -> JobPhase {
    let Some(floor) = floor else {
        return phase;
    };
    match phase {
        JobPhase::Progress(mut step) => {
            step.progress = step.progress.max(floor);
            JobPhase::Progress(step)
        }
        JobPhase::Failure {
            error,
            error_type,
            step,
            progress,
        } => JobPhase::Failure {
            error,
            error_type,
            step,
            progress: Some(progress.map_or(floor, |p| p.max(floor))),
        },
        other => other,
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job_id: &str) -> Result<JobSnapshot, StoreError> {
        match self.jobs.entry(job_id.to_string()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(job_id.to_string())),
            Entry::Vacant(slot) => Ok(slot.insert(JobRecord::new(job_id)).snapshot()),
        }
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobSnapshot>, StoreError> {
        Ok(self.jobs.get(job_id).map(|record| record.snapshot()))
    }

    async fn transition(&self, job_id: &str, phase: JobPhase) -> Result<JobSnapshot, StoreError> {
        let mut record = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::UnknownJob(job_id.to_string()))?;

        let from = record.phase.state();
        let to = phase.state();
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition {
                job_id: job_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        record.phase = clamp_progress(phase, record.phase.progress());
        record.updated_at = Utc::now();
        Ok(record.snapshot())
    }
}
