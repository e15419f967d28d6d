//! A job store that fails on demand.

use crate::errors::StoreError;
use crate::jobs::{InMemoryJobStore, JobPhase, JobSnapshot, JobStore};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Wraps an [`InMemoryJobStore`] and injects `Unavailable` errors.
///
/// Progress writes can be made to fail always; terminal writes can be made
/// to fail a fixed number of times before succeeding.
#[derive(Debug, Default)]
pub struct FlakyJobStore {
    inner: InMemoryJobStore,
    fail_progress: AtomicBool,
    terminal_failures_left: AtomicUsize,
    injected: AtomicUsize,
}

impl FlakyJobStore {
    /// Creates a store that does not fail.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `RUNNING`/`PROGRESS` write fail.
    #[must_use]
    pub fn failing_progress(self) -> Self {
        self.fail_progress.store(true, Ordering::SeqCst);
        self
    }

    /// Makes the next `times` terminal writes fail.
    #[must_use]
    pub fn failing_terminal(self, times: usize) -> Self {
        self.terminal_failures_left.store(times, Ordering::SeqCst);
        self
    }

    /// Number of errors injected so far.
    #[must_use]
    pub fn injected_failures(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn inject(&self, job_id: &str) -> StoreError {
        self.injected.fetch_add(1, Ordering::SeqCst);
        StoreError::Unavailable(format!("injected failure for {job_id}"))
    }
}

#[async_trait]
impl JobStore for FlakyJobStore {
    async fn create(&self, job_id: &str) -> Result<JobSnapshot, StoreError> {
        self.inner.create(job_id).await
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobSnapshot>, StoreError> {
        self.inner.get(job_id).await
    }

    async fn transition(&self, job_id: &str, phase: JobPhase) -> Result<JobSnapshot, StoreError> {
        if phase.state().is_terminal() {
            let remaining = self
                .terminal_failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
            if remaining.is_ok() {
                return Err(self.inject(job_id));
            }
        } else if self.fail_progress.load(Ordering::SeqCst) {
            return Err(self.inject(job_id));
        }
        self.inner.transition(job_id, phase).await
    }
}
