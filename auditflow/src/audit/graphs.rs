//! The two audit graph variants.

use super::stages::{
    AdvancedMetricsStage, DiagnoseStage, EvaluateStage, FairnessStage, LoadStage, OverfitStage,
    ReportStage, RobustnessStage, SensitivityStage, StressStage, SynthesisStage, XaiStage,
};
use crate::context::AuditContext;
use crate::errors::PipelineValidationError;
use crate::pipeline::{AuditGraph, GraphBuilder, Target};
use crate::services::AuditServices;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Which audit graph to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphVariant {
    /// Fixed chain with diagnosis.
    #[default]
    Basic,
    /// Agent insights and conditional advanced metrics.
    Advanced,
}

impl GraphVariant {
    /// Every variant.
    pub const ALL: [Self; 2] = [Self::Basic, Self::Advanced];

    /// Graph name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
        }
    }
}

impl fmt::Display for GraphVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GraphVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Self::Basic),
            "advanced" => Ok(Self::Advanced),
            other => Err(format!("unknown graph variant '{other}'")),
        }
    }
}

/// `load → evaluate → xai → sensitivity → robustness → fairness → overfit → diagnose → report`.
///
/// # Errors
///
/// Returns an error if the graph fails validation.
pub fn build_basic_graph(services: &AuditServices) -> Result<AuditGraph, PipelineValidationError> {
    GraphBuilder::new(GraphVariant::Basic.as_str())
        .stage("load", Arc::new(LoadStage::new(services.clone(), false)))?
        .stage("evaluate", Arc::new(EvaluateStage::evaluate(services.clone())))?
        .stage("xai", Arc::new(XaiStage::new(services.clone())))?
        .stage("sensitivity", Arc::new(SensitivityStage::new(services.clone())))?
        .stage("robustness", Arc::new(RobustnessStage::new(services.clone())))?
        .stage("fairness", Arc::new(FairnessStage::new(services.clone())))?
        .stage("overfit", Arc::new(OverfitStage))?
        .advisory_stage("diagnose", Arc::new(DiagnoseStage::new(services.clone())))?
        .stage("report", Arc::new(ReportStage::new(services.clone())))?
        .chain(&[
            "load",
            "evaluate",
            "xai",
            "sensitivity",
            "robustness",
            "fairness",
            "overfit",
            "diagnose",
            "report",
        ])?
        .build()
}

/// Chooses advanced metrics when the context asks for them.
pub fn route_after_metrics(ctx: &AuditContext) -> Target {
    if ctx.run_advanced {
        Target::stage("advanced_metrics")
    } else {
        Target::stage("xai")
    }
}

/// `load → metrics → {advanced_metrics →} xai → stress → fairness → synthesis → report`.
///
/// `run_advanced` seeds the flag the router reads after `metrics`.
///
/// # Errors
///
/// Returns an error if the graph fails validation.
pub fn build_advanced_graph(
    services: &AuditServices,
    run_advanced: bool,
) -> Result<AuditGraph, PipelineValidationError> {
    GraphBuilder::new(GraphVariant::Advanced.as_str())
        .stage("load", Arc::new(LoadStage::new(services.clone(), run_advanced)))?
        .stage("metrics", Arc::new(EvaluateStage::metrics(services.clone())))?
        .stage("advanced_metrics", Arc::new(AdvancedMetricsStage::new(services.clone())))?
        .stage("xai", Arc::new(XaiStage::new(services.clone()).with_insight()))?
        .stage("stress", Arc::new(StressStage::new(services.clone())))?
        .stage("fairness", Arc::new(FairnessStage::new(services.clone()).with_insight()))?
        .advisory_stage("synthesis", Arc::new(SynthesisStage))?
        .stage("report", Arc::new(ReportStage::new(services.clone())))?
        .edge("load", "metrics")?
        .conditional_edge(
            "metrics",
            "run_advanced",
            route_after_metrics,
            &["advanced_metrics", "xai"],
        )?
        .edge("advanced_metrics", "xai")?
        .chain(&["xai", "stress", "fairness", "synthesis", "report"])?
        .build()
}
