//! Core domain model types for auditflow.
//!
//! This module contains the fundamental types shared by the executor and stages:
//! - Step status and stage classification enums
//! - Progress updates and advisory failure records

mod event;
mod failure;
mod status;

pub use event::ProgressUpdate;
pub use failure::FailureRecord;
pub use status::{StageClass, StepStatus};
