//! Background audit jobs.
//!
//! This module provides:
//! - The closed job state type and the snapshots clients see
//! - A job store that enforces the job lifecycle
//! - The job manager: submit, status, and de-duplicated status streams

mod manager;
mod state;
mod store;


pub use manager::{truncate_error, JobManager, JobSettings, PERSISTENCE_ERROR, WORKER_PANIC};
pub use state::{JobEvent, JobPhase, JobRecord, JobSnapshot, JobState, StepProgress};
pub use store::{InMemoryJobStore, JobStore};
