//! # Auditflow
//!
//! Orchestration for machine-learning model audits.
//!
//! An audit is a graph of stages run against a shared context:
//!
//! - **Graphs**: a basic chain and an advanced graph with a conditional branch,
//!   validated at build time and describable as JSON
//! - **Execution**: sequential stages, advisory stages whose failures are
//!   recorded instead of aborting, and monotonic progress reporting
//! - **Jobs**: background runs with polling and server-sent event streams
//! - **Collaborators**: a dataset/model repository, a remote analysis engine
//!   and an optional LLM insight agent behind traits
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use auditflow::prelude::*;
//!
//! let runner = AuditRunner::new(services, &Settings::default())?;
//! let jobs = JobManager::in_memory(runner, JobSettings::default());
//!
//! let job = jobs.submit(GraphVariant::Basic, payload.into_request(owner)).await?;
//! let mut events = jobs.events(&job.job_id).await?;
//! while let Some(event) = events.next().await {
//!     println!("{}: {:?}", event.name(), event.snapshot().progress);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod audit;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod http;
pub mod jobs;
pub mod observability;
pub mod pipeline;
pub mod progress;
pub mod services;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::audit::{AuditResponse, AuditRunner, GraphVariant};
    pub use crate::config::Settings;
    pub use crate::context::{AuditContext, AuditPayload, AuditRequest, StagePatch};
    pub use crate::core::{ProgressUpdate, StageClass, StepStatus};
    pub use crate::errors::{AuditflowError, PipelineValidationError, StageError};
    pub use crate::jobs::{JobEvent, JobManager, JobSettings, JobSnapshot, JobState};
    pub use crate::pipeline::{AuditGraph, GraphBuilder, GraphDescription, PipelineExecutor};
    pub use crate::progress::ProgressReporter;
    pub use crate::services::{AnalysisEngine, AuditRepository, AuditServices, InsightAgent};
    pub use crate::stages::Stage;
}
