//! Audit stage implementations.
//!
//! Each stage reads the shared context, calls one collaborator, and returns
//! the patch to merge. Insight sub-steps go through [`best_effort`].

use crate::context::{AuditContext, StagePatch};
use crate::errors::StageError;
use crate::services::{AgentKind, AgentResponse, AuditServices, EngineJob, FairnessParams};
use crate::stages::{best_effort, Stage};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

/// Reason recorded when fairness has no protected attribute to work with.
pub const NO_SENSITIVE_ATTRIBUTE: &str = "No sensitive attribute provided";

/// Accuracy at or above this is flagged as a possible leakage risk.
pub const OVERFIT_ACCURACY_THRESHOLD: f64 = 0.98;

fn to_value<T: Serialize>(value: &T) -> Result<Value, StageError> {
    serde_json::to_value(value).map_err(|e| StageError::internal(format!("Failed to encode result: {e}")))
}

/// Asks the agent for an insight; failures are recorded on the patch.
async fn with_insight(
    services: &AuditServices,
    stage: &str,
    kind: AgentKind,
    payload: Value,
    patch: StagePatch,
) -> (StagePatch, Option<AgentResponse>) {
    match best_effort(stage, "insight", services.agent.analyze(kind, payload)).await {
        Ok(response) => (patch.with_insight(kind.as_str(), response.to_insight()), Some(response)),
        Err(failure) => (patch.with_advisory_failure(failure), None),
    }
}

/// Resolves the dataset and model for the request's owner.
#[derive(Debug, Clone)]
pub struct LoadStage {
    services: AuditServices,
    run_advanced: bool,
}

impl LoadStage {
    /// Creates the stage; `run_advanced` seeds the advanced-analysis flag.
    #[must_use]
    pub fn new(services: AuditServices, run_advanced: bool) -> Self {
        Self {
            services,
            run_advanced,
        }
    }
}

#[async_trait]
impl Stage for LoadStage {
    fn name(&self) -> &str {
        "load"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<StagePatch, StageError> {
        let owner = ctx.request.owner_id;
        let repository = &self.services.repository;
        let unavailable = |e: crate::services::RepositoryError| StageError::upstream(e.to_string());

        let dataset = repository
            .get_dataset(ctx.request.dataset_id(), owner)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| StageError::not_found(format!("Dataset {} not found", ctx.request.dataset_id())))?;
        let model = repository
            .get_model(ctx.request.model_id(), owner)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| StageError::not_found(format!("Model {} not found", ctx.request.model_id())))?;

        debug!(dataset = %dataset.name, model = %model.name, "Loaded audit inputs");
        Ok(StagePatch::empty()
            .with_records(dataset, model)
            .with_run_advanced(self.run_advanced)
            .with_run_fairness(ctx.request.protected_attribute().is_some()))
    }
}

/// Evaluates model performance.
///
/// Writes `results.<name>` and the detected problem type. With insights
/// enabled, a metrics agent reviews the numbers and may raise `run_advanced`.
#[derive(Debug, Clone)]
pub struct EvaluateStage {
    services: AuditServices,
    name: &'static str,
    insight: bool,
}

impl EvaluateStage {
    /// The basic variant: `results.evaluate`, no insight.
    #[must_use]
    pub fn evaluate(services: AuditServices) -> Self {
        Self {
            services,
            name: "evaluate",
            insight: false,
        }
    }

    /// The advanced variant: `results.metrics` with a metrics insight.
    #[must_use]
    pub fn metrics(services: AuditServices) -> Self {
        Self {
            services,
            name: "metrics",
            insight: true,
        }
    }
}

#[async_trait]
impl Stage for EvaluateStage {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, ctx: &AuditContext) -> Result<StagePatch, StageError> {
        let job = EngineJob::from_context(ctx)?;
        let evaluation = self.services.engine.evaluate(&job).await?;
        let patch = StagePatch::result(self.name, to_value(&evaluation)?)
            .with_problem_type(evaluation.problem_type.clone());
        if !self.insight {
            return Ok(patch);
        }

        let payload = json!({
            "metrics": evaluation.metrics,
            "problem_type": evaluation.problem_type,
            "n_samples": evaluation.n_samples,
            "n_features": evaluation.n_features,
            "n_classes": evaluation.n_classes,
        });
        let (patch, response) =
            with_insight(&self.services, self.name, AgentKind::Metrics, payload, patch).await;
        Ok(match response {
            Some(r) if r.requires_further_analysis => patch.with_run_advanced(true),
            _ => patch,
        })
    }
}

/// Computes feature attributions, optionally with an explainability insight.
#[derive(Debug, Clone)]
pub struct XaiStage {
    services: AuditServices,
    insight: bool,
}

impl XaiStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(services: AuditServices) -> Self {
        Self {
            services,
            insight: false,
        }
    }

    /// Enables the explainability insight.
    #[must_use]
    pub fn with_insight(mut self) -> Self {
        self.insight = true;
        self
    }
}

#[async_trait]
impl Stage for XaiStage {
    fn name(&self) -> &str {
        "xai"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<StagePatch, StageError> {
        let job = EngineJob::from_context(ctx)?;
        let explanation = to_value(&self.services.engine.explain(&job).await?)?;
        let patch = StagePatch::result("xai", explanation.clone());
        if !self.insight {
            return Ok(patch);
        }
        let (patch, _) =
            with_insight(&self.services, "xai", AgentKind::Xai, json!({ "xai": explanation }), patch).await;
        Ok(patch)
    }
}

/// Measures sensitivity to label noise.
#[derive(Debug, Clone)]
pub struct SensitivityStage {
    services: AuditServices,
}

impl SensitivityStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(services: AuditServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Stage for SensitivityStage {
    fn name(&self) -> &str {
        "sensitivity"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<StagePatch, StageError> {
        let job = EngineJob::from_context(ctx)?;
        let sensitivity = self.services.engine.sensitivity(&job).await?;
        Ok(StagePatch::result("sensitivity", to_value(&sensitivity)?))
    }
}

/// Measures robustness to feature corruption.
#[derive(Debug, Clone)]
pub struct RobustnessStage {
    services: AuditServices,
}

impl RobustnessStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(services: AuditServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Stage for RobustnessStage {
    fn name(&self) -> &str {
        "robustness"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<StagePatch, StageError> {
        let job = EngineJob::from_context(ctx)?;
        let robustness = self.services.engine.robustness(&job).await?;
        Ok(StagePatch::result("robustness", to_value(&robustness)?))
    }
}

/// Sensitivity and robustness back to back, as one stage.
#[derive(Debug, Clone)]
pub struct StressStage {
    services: AuditServices,
}

impl StressStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(services: AuditServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Stage for StressStage {
    fn name(&self) -> &str {
        "stress"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<StagePatch, StageError> {
        let job = EngineJob::from_context(ctx)?;
        let sensitivity = self.services.engine.sensitivity(&job).await?;
        let robustness = self.services.engine.robustness(&job).await?;
        Ok(StagePatch::result("sensitivity", to_value(&sensitivity)?)
            .with_result("robustness", to_value(&robustness)?))
    }
}

/// Group fairness across the protected attribute.
///
/// Without a protected attribute the stage skips and records why.
#[derive(Debug, Clone)]
pub struct FairnessStage {
    services: AuditServices,
    insight: bool,
}

impl FairnessStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(services: AuditServices) -> Self {
        Self {
            services,
            insight: false,
        }
    }

    /// Enables the fairness insight.
    #[must_use]
    pub fn with_insight(mut self) -> Self {
        self.insight = true;
        self
    }
}

#[async_trait]
impl Stage for FairnessStage {
    fn name(&self) -> &str {
        "fairness"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<StagePatch, StageError> {
        let params = match FairnessParams::from_context(ctx) {
            Some(params) if ctx.run_fairness => params,
            _ => {
                return Ok(StagePatch::skipped(NO_SENSITIVE_ATTRIBUTE)
                    .with_result("fairness", json!({"skipped": true, "reason": NO_SENSITIVE_ATTRIBUTE})));
            }
        };

        let job = EngineJob::from_context(ctx)?;
        let report = to_value(&self.services.engine.fairness(&job, &params).await?)?;
        let patch = StagePatch::result("fairness", report.clone());
        if !self.insight {
            return Ok(patch);
        }

        let payload = json!({
            "fairness": report,
            "sensitive_attribute": params.sensitive_attribute,
            "privileged_values": params.privileged_values,
            "unprivileged_values": params.unprivileged_values,
        });
        let (patch, _) = with_insight(&self.services, "fairness", AgentKind::Fairness, payload, patch).await;
        Ok(patch)
    }
}

/// Flags suspiciously high accuracy as a leakage risk.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverfitStage;

impl OverfitStage {
    fn accuracy(ctx: &AuditContext) -> Option<f64> {
        ["evaluate", "metrics"]
            .iter()
            .find_map(|key| ctx.result(key))
            .and_then(|r| r.pointer("/metrics/accuracy"))
            .and_then(Value::as_f64)
    }
}

#[async_trait]
impl Stage for OverfitStage {
    fn name(&self) -> &str {
        "overfit"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<StagePatch, StageError> {
        let mut flags = Vec::new();
        if let Some(accuracy) = Self::accuracy(ctx) {
            if accuracy >= OVERFIT_ACCURACY_THRESHOLD {
                flags.push(format!(
                    "Accuracy {accuracy:.3} is at or above {OVERFIT_ACCURACY_THRESHOLD}; check for data leakage or overfitting"
                ));
            }
        }
        Ok(StagePatch::result("overfit", json!({ "flags": flags })))
    }
}

/// Narrative diagnosis of the results gathered so far.
#[derive(Debug, Clone)]
pub struct DiagnoseStage {
    services: AuditServices,
}

impl DiagnoseStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(services: AuditServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Stage for DiagnoseStage {
    fn name(&self) -> &str {
        "diagnose"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<StagePatch, StageError> {
        let job = EngineJob::from_context(ctx)?;
        let diagnosis = self.services.engine.diagnose(&job, &ctx.results.to_value()).await?;
        Ok(StagePatch::result("diagnose", to_value(&diagnosis)?))
    }
}

/// Advanced metrics: calibration, confidence intervals, adversarial robustness.
#[derive(Debug, Clone)]
pub struct AdvancedMetricsStage {
    services: AuditServices,
}

impl AdvancedMetricsStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(services: AuditServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Stage for AdvancedMetricsStage {
    fn name(&self) -> &str {
        "advanced_metrics"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<StagePatch, StageError> {
        let job = EngineJob::from_context(ctx)?;
        let metrics = self.services.engine.advanced_metrics(&job).await?;
        Ok(StagePatch::result("advanced_metrics", to_value(&metrics)?))
    }
}

/// Combines agent insights into overall findings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SynthesisStage;

#[async_trait]
impl Stage for SynthesisStage {
    fn name(&self) -> &str {
        "synthesis"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<StagePatch, StageError> {
        let mut findings = Vec::new();
        let mut recommendations = Vec::new();
        let mut confidences = Vec::new();

        for (_, insight) in ctx.agent_insights.iter() {
            let Some(insight) = insight.as_object() else {
                continue;
            };
            if let Some(items) = insight.get("findings").and_then(Value::as_array) {
                findings.extend(items.iter().cloned());
            }
            if let Some(items) = insight.get("recommendations").and_then(Value::as_array) {
                recommendations.extend(items.iter().cloned());
            }
            confidences.push(insight.get("confidence").and_then(Value::as_f64).unwrap_or(0.5));
        }

        #[allow(clippy::cast_precision_loss)]
        let overall_confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        Ok(StagePatch::result(
            "synthesis",
            json!({
                "combined_findings": findings,
                "combined_recommendations": recommendations,
                "overall_confidence": overall_confidence,
            }),
        ))
    }
}

/// Renders the final report.
#[derive(Debug, Clone)]
pub struct ReportStage {
    services: AuditServices,
}

impl ReportStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(services: AuditServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Stage for ReportStage {
    fn name(&self) -> &str {
        "report"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<StagePatch, StageError> {
        let job = EngineJob::from_context(ctx)?;
        let params = FairnessParams::from_context(ctx);
        let report = self
            .services
            .engine
            .render_report(&job, params.as_ref(), &ctx.results.to_value())
            .await?;
        Ok(StagePatch::result("report", to_value(&report)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{merge, AuditPayload};
    use crate::errors::ErrorClass;
    use crate::testing::{ScriptedAgent, ScriptedEngine, TestHarness};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_load_resolves_records_and_seeds_flags() {
        let harness = TestHarness::new();
        let ctx = AuditContext::new(harness.fairness_payload().into_request(harness.owner));

        let patch = LoadStage::new(harness.services(), true).run(&ctx).await.unwrap();
        assert_eq!(patch.dataset.as_ref().unwrap().name, "credit");
        assert_eq!(patch.run_advanced, Some(true));
        assert_eq!(patch.run_fairness, Some(true));
    }

    #[tokio::test]
    async fn test_load_unknown_dataset_is_not_found() {
        let harness = TestHarness::new();
        let ctx = AuditContext::new(AuditPayload::new(99, 1).into_request(harness.owner));

        let err = LoadStage::new(harness.services(), true).run(&ctx).await.unwrap_err();
        assert_eq!(err.class, ErrorClass::NotFound);
        assert!(err.message.contains("not found"));
    }

    #[tokio::test]
    async fn test_load_hides_other_owners_records() {
        let harness = TestHarness::new();
        let ctx = AuditContext::new(harness.payload().into_request(Uuid::new_v4()));

        let err = LoadStage::new(harness.services(), false).run(&ctx).await.unwrap_err();
        assert_eq!(err.class, ErrorClass::NotFound);
    }

    #[tokio::test]
    async fn test_evaluate_writes_results_and_problem_type() {
        let harness = TestHarness::new();
        let ctx = harness.loaded_context(harness.payload());

        let patch = EvaluateStage::evaluate(harness.services()).run(&ctx).await.unwrap();
        let evaluate = &patch.results["evaluate"];
        assert_eq!(evaluate["metrics"]["accuracy"], 0.91);
        assert!(evaluate.get("problem_type").is_none());
        assert_eq!(patch.problem_type.as_deref(), Some("classification"));
        assert!(patch.insights.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_insight_failure_keeps_metrics() {
        let harness = TestHarness::new().with_agent(ScriptedAgent::new().failing_on(AgentKind::Metrics));
        let ctx = harness.loaded_context(harness.payload());

        let patch = EvaluateStage::metrics(harness.services()).run(&ctx).await.unwrap();
        assert!(patch.results.contains_key("metrics"));
        assert!(!patch.insights.contains_key("metrics"));
        assert_eq!(patch.advisory_failures.len(), 1);
        assert_eq!(patch.advisory_failures[0].stage, "metrics.insight");
    }

    #[tokio::test]
    async fn test_metrics_insight_can_request_advanced_analysis() {
        let harness = TestHarness::new().with_agent(ScriptedAgent::new().requesting_further_analysis());
        let ctx = harness.loaded_context(harness.payload());

        let patch = EvaluateStage::metrics(harness.services()).run(&ctx).await.unwrap();
        assert_eq!(patch.run_advanced, Some(true));
        assert_eq!(patch.insights["metrics"]["confidence"], 0.8);
    }

    #[tokio::test]
    async fn test_fairness_skips_without_protected_attribute() {
        let harness = TestHarness::new();
        let ctx = harness.loaded_context(harness.payload());

        let patch = FairnessStage::new(harness.services()).run(&ctx).await.unwrap();
        assert!(patch.is_skip());
        assert_eq!(
            patch.results["fairness"],
            json!({"skipped": true, "reason": NO_SENSITIVE_ATTRIBUTE})
        );
        assert_eq!(harness.engine.call_count("fairness"), 0);
    }

    #[tokio::test]
    async fn test_fairness_runs_with_protected_attribute() {
        let harness = TestHarness::new();
        let ctx = merge(
            harness.loaded_context(harness.fairness_payload()),
            StagePatch::empty().with_run_fairness(true),
        );

        let patch = FairnessStage::new(harness.services()).with_insight().run(&ctx).await.unwrap();
        assert!(!patch.is_skip());
        assert_eq!(patch.results["fairness"]["disparate_impact"], 0.85);
        assert!(patch.insights.contains_key("fairness"));
    }

    #[tokio::test]
    async fn test_engine_failure_propagates_class() {
        let harness = TestHarness::new()
            .with_engine(ScriptedEngine::new().with_failure("explain", StageError::data_contract("missing column 'age'")));
        let ctx = harness.loaded_context(harness.payload());

        let err = XaiStage::new(harness.services()).run(&ctx).await.unwrap_err();
        assert_eq!(err.class, ErrorClass::DataContract);
    }

    #[tokio::test]
    async fn test_stress_writes_both_results() {
        let harness = TestHarness::new();
        let ctx = harness.loaded_context(harness.payload());

        let patch = StressStage::new(harness.services()).run(&ctx).await.unwrap();
        assert_eq!(patch.results.keys().collect::<Vec<_>>(), vec!["robustness", "sensitivity"]);
        assert_eq!(harness.engine.calls(), vec!["sensitivity", "robustness"]);
    }

    #[tokio::test]
    async fn test_overfit_flags_high_accuracy() {
        let harness = TestHarness::new();
        let ctx = merge(
            harness.loaded_context(harness.payload()),
            StagePatch::result("evaluate", json!({"metrics": {"accuracy": 0.995}})),
        );
        let patch = OverfitStage.run(&ctx).await.unwrap();
        assert_eq!(patch.results["overfit"]["flags"].as_array().unwrap().len(), 1);

        let ctx = merge(
            harness.loaded_context(harness.payload()),
            StagePatch::result("metrics", json!({"metrics": {"accuracy": 0.9}})),
        );
        let patch = OverfitStage.run(&ctx).await.unwrap();
        assert_eq!(patch.results["overfit"], json!({"flags": []}));
    }

    #[tokio::test]
    async fn test_synthesis_averages_confidence() {
        let harness = TestHarness::new();
        let ctx = merge(
            harness.loaded_context(harness.payload()),
            StagePatch::empty()
                .with_insight("metrics", json!({"confidence": 0.6, "findings": ["a"], "recommendations": []}))
                .with_insight("xai", json!({"confidence": 1.0, "findings": ["b"], "recommendations": ["c"]})),
        );

        let patch = SynthesisStage.run(&ctx).await.unwrap();
        let synthesis = &patch.results["synthesis"];
        assert_eq!(synthesis["combined_findings"], json!(["a", "b"]));
        assert_eq!(synthesis["combined_recommendations"], json!(["c"]));
        assert!((synthesis["overall_confidence"].as_f64().unwrap() - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_synthesis_without_insights_has_zero_confidence() {
        let harness = TestHarness::new();
        let patch = SynthesisStage.run(&harness.loaded_context(harness.payload())).await.unwrap();
        assert_eq!(patch.results["synthesis"]["overall_confidence"], 0.0);
    }

    #[tokio::test]
    async fn test_report_requires_loaded_records() {
        let harness = TestHarness::new();
        let ctx = AuditContext::new(harness.payload().into_request(harness.owner));
        let err = ReportStage::new(harness.services()).run(&ctx).await.unwrap_err();
        assert_eq!(err.class, ErrorClass::Internal);
    }
}
