//! Shared audit context.
//!
//! This module provides:
//! - The request and input records a run is parameterized by
//! - The write-once results bag
//! - The stage patch and the merge rule that folds it into the context

mod audit;
mod bags;
mod patch;
mod records;
mod request;

pub use audit::{merge, AuditContext};
pub use bags::ResultBag;
pub use patch::StagePatch;
pub use records::{AnalysisRecord, DatasetRecord, ModelRecord, NewAnalysis};
pub use request::{AuditPayload, AuditRequest, ProtectedAttribute};
