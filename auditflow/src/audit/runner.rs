//! Builds both graph variants once and runs them on demand.

use super::graphs::{build_advanced_graph, build_basic_graph, GraphVariant};
use crate::config::Settings;
use crate::context::{AuditContext, AuditRequest};
use crate::errors::{AuditflowError, PipelineValidationError};
use crate::pipeline::{AuditGraph, ExecutorOptions, GraphDescription, PipelineExecutor};
use crate::progress::{LoggingReporter, ProgressReporter};
use crate::services::AuditServices;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Body returned by a synchronous graph run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResponse {
    /// Always `completed`; failures are returned as errors.
    pub status: String,
    /// Detected problem type.
    pub problem_type: Option<String>,
    /// Per-stage results. The advanced variant adds `agent_insights`.
    pub results: Value,
}

impl AuditResponse {
    /// Projects a finished context.
    #[must_use]
    pub fn from_context(variant: GraphVariant, ctx: &AuditContext) -> Self {
        let mut results = ctx.results.to_value();
        if variant == GraphVariant::Advanced {
            if let Some(map) = results.as_object_mut() {
                map.insert("agent_insights".to_string(), ctx.agent_insights.to_value());
            }
        }
        Self {
            status: "completed".to_string(),
            problem_type: ctx.problem_type.clone(),
            results,
        }
    }
}

/// Holds the collaborators and the prebuilt graphs.
#[derive(Debug, Clone)]
pub struct AuditRunner {
    services: AuditServices,
    basic: Arc<AuditGraph>,
    advanced: Arc<AuditGraph>,
}

impl AuditRunner {
    /// Builds both graphs.
    ///
    /// # Errors
    ///
    /// Returns an error if a graph fails validation.
    pub fn new(services: AuditServices, settings: &Settings) -> Result<Self, PipelineValidationError> {
        let basic = build_basic_graph(&services)?;
        let advanced = build_advanced_graph(&services, settings.run_advanced_by_default)?;
        Ok(Self {
            services,
            basic: Arc::new(basic),
            advanced: Arc::new(advanced),
        })
    }

    /// The collaborators stages use.
    #[must_use]
    pub fn services(&self) -> &AuditServices {
        &self.services
    }

    /// The graph for `variant`.
    #[must_use]
    pub fn graph(&self, variant: GraphVariant) -> &AuditGraph {
        match variant {
            GraphVariant::Basic => &self.basic,
            GraphVariant::Advanced => &self.advanced,
        }
    }

    /// Describes the graph for `variant`.
    #[must_use]
    pub fn describe(&self, variant: GraphVariant) -> GraphDescription {
        self.graph(variant).describe()
    }

    /// Runs `variant` for `request`, reporting progress to `reporter`.
    ///
    /// # Errors
    ///
    /// Returns the first required stage failure or a routing error.
    pub async fn run(
        &self,
        variant: GraphVariant,
        request: AuditRequest,
        reporter: &dyn ProgressReporter,
        options: ExecutorOptions,
    ) -> Result<AuditContext, AuditflowError> {
        PipelineExecutor::new(options)
            .run(self.graph(variant), AuditContext::new(request), reporter)
            .await
    }

    /// Runs `variant` within the caller's lifetime and returns the response body.
    ///
    /// # Errors
    ///
    /// Returns the first required stage failure or a routing error.
    pub async fn run_sync(
        &self,
        variant: GraphVariant,
        request: AuditRequest,
    ) -> Result<AuditResponse, AuditflowError> {
        let ctx = self
            .run(variant, request, &LoggingReporter::debug(), ExecutorOptions::default())
            .await?;
        Ok(AuditResponse::from_context(variant, &ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepStatus;
    use crate::errors::StageError;
    use crate::progress::CollectingReporter;
    use crate::services::AgentKind;
    use crate::testing::{ScriptedAgent, ScriptedEngine, TestHarness};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn runner(harness: &TestHarness, settings: &Settings) -> AuditRunner {
        AuditRunner::new(harness.services(), settings).unwrap()
    }

    #[tokio::test]
    async fn test_basic_run_without_protected_attribute() {
        let harness = TestHarness::new();
        let response = runner(&harness, &Settings::default())
            .run_sync(GraphVariant::Basic, harness.payload().into_request(harness.owner))
            .await
            .unwrap();

        assert_eq!(response.status, "completed");
        assert_eq!(response.problem_type.as_deref(), Some("classification"));
        assert_eq!(
            response.results["fairness"],
            json!({"skipped": true, "reason": "No sensitive attribute provided"})
        );
        assert!(!response.results["evaluate"]["metrics"].as_object().unwrap().is_empty());
        assert_eq!(response.results["report"]["txt_path"], "reports/1-1.txt");
        assert!(response.results.get("agent_insights").is_none());
    }

    #[tokio::test]
    async fn test_basic_run_diagnose_failure_is_tolerated() {
        let harness = TestHarness::new()
            .with_engine(ScriptedEngine::new().with_failure("diagnose", StageError::upstream("narrative backend down")));
        let reporter = CollectingReporter::new();
        let ctx = runner(&harness, &Settings::default())
            .run(
                GraphVariant::Basic,
                harness.payload().into_request(harness.owner),
                &reporter,
                ExecutorOptions::default(),
            )
            .await
            .unwrap();

        assert!(!ctx.has_result("diagnose"));
        assert!(ctx.has_result("report"));
        assert_eq!(ctx.advisory_failures[0].stage, "diagnose");
        assert_eq!(reporter.for_step("diagnose").last().unwrap().status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_required_failure_keeps_prior_results_only() {
        let harness = TestHarness::new()
            .with_engine(ScriptedEngine::new().with_failure("sensitivity", StageError::data_contract("missing feature columns")));
        let err = runner(&harness, &Settings::default())
            .run_sync(GraphVariant::Basic, harness.payload().into_request(harness.owner))
            .await
            .unwrap_err();

        assert_eq!(err.error_type(), "DataContractError");
        assert!(err.to_string().contains("sensitivity"));
        assert_eq!(harness.engine.calls(), vec!["evaluate", "explain", "sensitivity"]);
    }

    #[tokio::test]
    async fn test_advanced_run_takes_advanced_branch_by_default() {
        let harness = TestHarness::new();
        let response = runner(&harness, &Settings::default())
            .run_sync(GraphVariant::Advanced, harness.fairness_payload().into_request(harness.owner))
            .await
            .unwrap();

        assert!(response.results.get("advanced_metrics").is_some());
        let insights = &response.results["agent_insights"];
        assert!(insights.get("metrics").is_some());
        assert!(insights.get("xai").is_some());
        assert!(insights.get("fairness").is_some());
        assert!((response.results["synthesis"]["overall_confidence"].as_f64().unwrap() - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_advanced_run_skips_branch_when_not_requested() {
        let harness = TestHarness::new();
        let reporter = CollectingReporter::new();
        let settings = Settings::default().with_run_advanced_by_default(false);
        let ctx = runner(&harness, &settings)
            .run(
                GraphVariant::Advanced,
                harness.payload().into_request(harness.owner),
                &reporter,
                ExecutorOptions::default(),
            )
            .await
            .unwrap();

        assert!(!ctx.has_result("advanced_metrics"));
        assert_eq!(harness.engine.call_count("advanced_metrics"), 0);
        let bypassed = reporter.for_step("advanced_metrics");
        assert_eq!(bypassed.len(), 1);
        assert_eq!(bypassed[0].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_agent_can_request_advanced_branch() {
        let harness = TestHarness::new().with_agent(ScriptedAgent::new().requesting_further_analysis());
        let settings = Settings::default().with_run_advanced_by_default(false);
        let ctx = runner(&harness, &settings)
            .run(
                GraphVariant::Advanced,
                harness.payload().into_request(harness.owner),
                &CollectingReporter::new(),
                ExecutorOptions::default(),
            )
            .await
            .unwrap();

        assert!(ctx.has_result("advanced_metrics"));
    }

    #[tokio::test]
    async fn test_failed_insight_is_absent_not_null() {
        let harness = TestHarness::new().with_agent(ScriptedAgent::new().failing_on(AgentKind::Metrics));
        let response = runner(&harness, &Settings::default())
            .run_sync(GraphVariant::Advanced, harness.payload().into_request(harness.owner))
            .await
            .unwrap();

        assert!(response.results.get("metrics").is_some());
        assert!(response.results["agent_insights"].get("metrics").is_none());
        assert!(response.results["agent_insights"].get("xai").is_some());
        assert!(response.results["agent_insights"].get("fairness").is_none());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_over_full_run() {
        let harness = TestHarness::new();
        let reporter = CollectingReporter::new();
        runner(&harness, &Settings::default())
            .run(
                GraphVariant::Advanced,
                harness.fairness_payload().into_request(harness.owner),
                &reporter,
                ExecutorOptions::default().with_trailing_steps(1),
            )
            .await
            .unwrap();

        let progress: Vec<f64> = reporter.updates().iter().map(|u| u.progress).collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert!(progress.iter().all(|p| *p < 1.0));
    }
}
