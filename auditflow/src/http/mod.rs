//! HTTP surface: job submission, status polling, event streams and
//! synchronous graph runs.

mod error;
mod handlers;

pub use error::{ApiError, OwnerId, OWNER_HEADER};

use crate::audit::AuditRunner;
use crate::jobs::JobManager;
use axum::routing::{get, post};
use axum::Router;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Background job manager; also owns the runner used for synchronous runs.
    pub jobs: JobManager,
}

impl AppState {
    /// Creates state around a job manager.
    #[must_use]
    pub fn new(jobs: JobManager) -> Self {
        Self { jobs }
    }

    /// The runner shared by jobs and synchronous runs.
    #[must_use]
    pub fn runner(&self) -> &AuditRunner {
        self.jobs.runner()
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/audit/full", post(handlers::submit_audit))
        .route("/audit/full/:job_id", get(handlers::job_status))
        .route("/audit/full/:job_id/events", get(handlers::job_events))
        .route("/audit/graph", post(handlers::run_basic))
        .route("/audit/graph/advanced", post(handlers::run_advanced))
        .route("/audit/graph/:variant/describe", get(handlers::describe_graph))
        .with_state(state)
}
