//! The audit pipelines.
//!
//! This module provides:
//! - Stage implementations backed by [`AuditServices`](crate::services::AuditServices)
//! - The `basic` and `advanced` graph variants
//! - [`AuditRunner`], which builds both once and runs them

mod graphs;
mod runner;
mod stages;

pub use graphs::{build_advanced_graph, build_basic_graph, route_after_metrics, GraphVariant};
pub use runner::{AuditResponse, AuditRunner};
pub use stages::{
    AdvancedMetricsStage, DiagnoseStage, EvaluateStage, FairnessStage, LoadStage, OverfitStage,
    ReportStage, RobustnessStage, SensitivityStage, StressStage, SynthesisStage, XaiStage,
    NO_SENSITIVE_ATTRIBUTE, OVERFIT_ACCURACY_THRESHOLD,
};
