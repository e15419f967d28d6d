//! Deterministic analysis engine and insight agent.

use crate::errors::StageError;
use crate::services::{
    AdvancedMetrics, AgentError, AgentKind, AgentResponse, AnalysisEngine, Diagnosis, EngineJob,
    Evaluation, Explanation, FairnessParams, FairnessReport, InsightAgent, RenderedReport,
    Robustness, Sensitivity,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// An engine returning canned results, with per-operation failure injection.
///
/// Operation names are `evaluate`, `explain`, `sensitivity`, `robustness`,
/// `fairness`, `advanced_metrics`, `diagnose` and `report`.
#[derive(Debug)]
pub struct ScriptedEngine {
    accuracy: f64,
    problem_type: String,
    delay: Option<Duration>,
    failures: Mutex<HashMap<String, StageError>>,
    panics: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    /// Creates a classification engine reporting 0.91 accuracy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accuracy: 0.91,
            problem_type: "classification".to_string(),
            delay: None,
            failures: Mutex::new(HashMap::new()),
            panics: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sets the reported accuracy.
    #[must_use]
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }

    /// Reports a regression problem instead.
    #[must_use]
    pub fn regression(mut self) -> Self {
        self.problem_type = "regression".to_string();
        self
    }

    /// Sleeps this long in every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes `operation` fail with `error`.
    #[must_use]
    pub fn with_failure(self, operation: &str, error: StageError) -> Self {
        self.fail_on(operation, error);
        self
    }

    /// Makes `operation` panic.
    #[must_use]
    pub fn with_panic(self, operation: &str) -> Self {
        self.panics.lock().insert(operation.to_string());
        self
    }

    /// Makes `operation` fail from now on.
    pub fn fail_on(&self, operation: &str, error: StageError) {
        self.failures.lock().insert(operation.to_string(), error);
    }

    /// Operations called so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of calls to `operation`.
    #[must_use]
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == operation).count()
    }

    async fn enter(&self, operation: &str) -> Result<(), StageError> {
        self.calls.lock().push(operation.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panics.lock().contains(operation) {
            panic!("scripted panic in {operation}");
        }
        match self.failures.lock().get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn artifact(job: &EngineJob, operation: &str) -> String {
        format!("artifacts/{}-{}/{operation}.json", job.dataset.id, job.model.id)
    }
}

#[async_trait]
impl AnalysisEngine for ScriptedEngine {
    async fn evaluate(&self, job: &EngineJob) -> Result<Evaluation, StageError> {
        self.enter("evaluate").await?;
        let mut metrics = Map::new();
        let n_classes = if self.problem_type == "classification" {
            metrics.insert("accuracy".to_string(), json!(self.accuracy));
            metrics.insert("f1_macro".to_string(), json!(self.accuracy - 0.02));
            metrics.insert("roc_auc".to_string(), json!(0.95));
            Some(2)
        } else {
            metrics.insert("rmse".to_string(), json!(1.25));
            metrics.insert("r2".to_string(), json!(0.82));
            None
        };
        Ok(Evaluation {
            problem_type: self.problem_type.clone(),
            metrics,
            n_samples: 200,
            n_features: 6,
            n_classes,
            artifact_path: Self::artifact(job, "evaluate"),
        })
    }

    async fn explain(&self, job: &EngineJob) -> Result<Explanation, StageError> {
        self.enter("explain").await?;
        Ok(Explanation {
            permutation_importance: json!([
                {"feature": "income", "importance_mean": 0.21},
                {"feature": "age", "importance_mean": 0.08}
            ]),
            shap_summary: json!({"feature_names": ["income", "age"], "global_mean_abs": [0.3, 0.1]}),
            sample_size: 100,
            artifact_path: Self::artifact(job, "explain"),
        })
    }

    async fn sensitivity(&self, job: &EngineJob) -> Result<Sensitivity, StageError> {
        self.enter("sensitivity").await?;
        Ok(Sensitivity {
            label_flip_rate: Some(0.04),
            proba_shift_mean: Some(0.02),
            artifact_path: Self::artifact(job, "sensitivity"),
        })
    }

    async fn robustness(&self, job: &EngineJob) -> Result<Robustness, StageError> {
        self.enter("robustness").await?;
        Ok(Robustness {
            metric_drop: Some(0.03),
            missing_feature_impact: json!({"income": 0.05}),
            artifact_path: Self::artifact(job, "robustness"),
        })
    }

    async fn fairness(&self, job: &EngineJob, _params: &FairnessParams) -> Result<FairnessReport, StageError> {
        self.enter("fairness").await?;
        Ok(FairnessReport {
            demographic_parity_diff: Some(0.12),
            disparate_impact: Some(0.85),
            equal_opportunity_diff: Some(0.07),
            predictive_equality_diff: Some(0.05),
            artifact_path: Self::artifact(job, "fairness"),
        })
    }

    async fn advanced_metrics(&self, job: &EngineJob) -> Result<AdvancedMetrics, StageError> {
        self.enter("advanced_metrics").await?;
        Ok(AdvancedMetrics {
            calibration_error: Some(0.06),
            brier_score: Some(0.11),
            confidence_intervals: Some(json!({"accuracy": [0.88, 0.94]})),
            adversarial_robustness: Some(json!({"accuracy_under_noise": 0.86})),
            artifact_path: Self::artifact(job, "advanced_metrics"),
        })
    }

    async fn diagnose(&self, job: &EngineJob, results: &Value) -> Result<Diagnosis, StageError> {
        self.enter("diagnose").await?;
        let stages = results.as_object().map_or(0, Map::len);
        Ok(Diagnosis {
            summary: format!("Reviewed {stages} analyses"),
            risks: vec!["Moderate demographic parity gap".to_string()],
            recommendations: vec!["Collect more samples for the unprivileged group".to_string()],
            artifact_path: Some(Self::artifact(job, "diagnose")),
        })
    }

    async fn render_report(
        &self,
        job: &EngineJob,
        _fairness: Option<&FairnessParams>,
        _results: &Value,
    ) -> Result<RenderedReport, StageError> {
        self.enter("report").await?;
        Ok(RenderedReport {
            txt_path: format!("reports/{}-{}.txt", job.dataset.id, job.model.id),
        })
    }
}

/// An insight agent with canned answers.
#[derive(Debug)]
pub struct ScriptedAgent {
    confidence: f64,
    further_analysis: bool,
    failing: Mutex<HashSet<AgentKind>>,
    calls: Mutex<Vec<AgentKind>>,
}

impl Default for ScriptedAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAgent {
    /// Creates an agent that answers every kind with confidence 0.8.
    #[must_use]
    pub fn new() -> Self {
        Self {
            confidence: 0.8,
            further_analysis: false,
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sets the reported confidence.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Makes every answer ask for deeper analysis.
    #[must_use]
    pub fn requesting_further_analysis(mut self) -> Self {
        self.further_analysis = true;
        self
    }

    /// Makes `kind` fail.
    #[must_use]
    pub fn failing_on(self, kind: AgentKind) -> Self {
        self.failing.lock().insert(kind);
        self
    }

    /// Kinds analyzed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<AgentKind> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl InsightAgent for ScriptedAgent {
    async fn analyze(&self, kind: AgentKind, _payload: Value) -> Result<AgentResponse, AgentError> {
        self.calls.lock().push(kind);
        if self.failing.lock().contains(&kind) {
            return Err(AgentError::RequestFailed(format!("scripted {kind} failure")));
        }
        Ok(AgentResponse {
            summary: format!("{kind} looks reasonable"),
            confidence: self.confidence,
            findings: vec![format!("{kind} finding")],
            recommendations: vec![format!("{kind} recommendation")],
            requires_further_analysis: self.further_analysis,
        })
    }
}
