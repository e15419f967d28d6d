//! The analysis engine: the numerical work behind each audit stage.

use crate::context::{AuditContext, DatasetRecord, ModelRecord};
use crate::errors::StageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Debug;

/// Inputs shared by every engine call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineJob {
    /// Dataset under audit.
    pub dataset: DatasetRecord,
    /// Model under audit.
    pub model: ModelRecord,
    /// Columns to drop from the feature matrix.
    #[serde(default)]
    pub exclude_columns: Vec<String>,
}

impl EngineJob {
    /// Builds the job for the context's resolved records.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the records have not been loaded.
    pub fn from_context(ctx: &AuditContext) -> Result<Self, StageError> {
        Ok(Self {
            dataset: ctx.dataset()?.clone(),
            model: ctx.model()?.clone(),
            exclude_columns: ctx.request.excluded_columns(),
        })
    }
}

/// Protected-attribute parameters for fairness analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessParams {
    /// Protected attribute column.
    pub sensitive_attribute: String,
    /// Privileged group values.
    pub privileged_values: Vec<Value>,
    /// Unprivileged group values.
    pub unprivileged_values: Vec<Value>,
    /// Favourable label.
    pub positive_label: Value,
}

impl FairnessParams {
    /// Extracts the parameters from the request, if a protected attribute is set.
    #[must_use]
    pub fn from_context(ctx: &AuditContext) -> Option<Self> {
        let attr = ctx.request.protected_attribute()?;
        Some(Self {
            sensitive_attribute: attr.name.to_string(),
            privileged_values: attr.privileged.to_vec(),
            unprivileged_values: attr.unprivileged.to_vec(),
            positive_label: ctx.request.positive_label().clone(),
        })
    }
}

/// Performance evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// `classification` or `regression`.
    #[serde(skip_serializing)]
    pub problem_type: String,
    /// Metric name to value.
    pub metrics: Map<String, Value>,
    /// Rows evaluated.
    pub n_samples: u64,
    /// Feature columns.
    pub n_features: u64,
    /// Distinct classes, for classification.
    pub n_classes: Option<u64>,
    /// Stored artifact.
    pub artifact_path: String,
}

/// Explainability output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// Permutation importance per feature.
    pub permutation_importance: Value,
    /// SHAP summary.
    pub shap_summary: Value,
    /// Rows sampled for the explanation.
    pub sample_size: u64,
    /// Stored artifact.
    pub artifact_path: String,
}

/// Label-noise sensitivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensitivity {
    /// Fraction of predictions that flip under perturbation.
    pub label_flip_rate: Option<f64>,
    /// Mean shift of predicted probabilities.
    pub proba_shift_mean: Option<f64>,
    /// Stored artifact.
    pub artifact_path: String,
}

/// Robustness under feature corruption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Robustness {
    /// Drop of the primary metric under noise.
    pub metric_drop: Option<f64>,
    /// Per-feature impact of missing values.
    pub missing_feature_impact: Value,
    /// Stored artifact.
    pub artifact_path: String,
}

/// Group fairness metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessReport {
    /// Difference in positive rates.
    pub demographic_parity_diff: Option<f64>,
    /// Ratio of positive rates.
    pub disparate_impact: Option<f64>,
    /// Difference in true positive rates.
    pub equal_opportunity_diff: Option<f64>,
    /// Difference in false positive rates.
    pub predictive_equality_diff: Option<f64>,
    /// Stored artifact.
    pub artifact_path: String,
}

/// Calibration and adversarial metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedMetrics {
    /// Expected calibration error.
    pub calibration_error: Option<f64>,
    /// Brier score.
    pub brier_score: Option<f64>,
    /// Bootstrap confidence intervals per metric.
    pub confidence_intervals: Option<Value>,
    /// Metric under adversarial perturbation.
    pub adversarial_robustness: Option<Value>,
    /// Stored artifact.
    pub artifact_path: String,
}

/// Narrative diagnosis of prior results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// One-paragraph summary.
    pub summary: String,
    /// Identified risks.
    pub risks: Vec<String>,
    /// Recommended actions.
    pub recommendations: Vec<String>,
    /// Stored artifact.
    pub artifact_path: Option<String>,
}

/// A rendered audit report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedReport {
    /// Location of the text report.
    pub txt_path: String,
}

/// Runs the numerical analyses for a dataset/model pair.
///
/// Implementations classify their failures: a missing artifact is
/// `NotFound`, unusable data is `DataContract`, an unreachable backend is
/// `Upstream`.
#[async_trait]
pub trait AnalysisEngine: Send + Sync + Debug {
    /// Computes performance metrics and detects the problem type.
    async fn evaluate(&self, job: &EngineJob) -> Result<Evaluation, StageError>;

    /// Computes feature attributions.
    async fn explain(&self, job: &EngineJob) -> Result<Explanation, StageError>;

    /// Measures sensitivity to label noise.
    async fn sensitivity(&self, job: &EngineJob) -> Result<Sensitivity, StageError>;

    /// Measures robustness to feature corruption.
    async fn robustness(&self, job: &EngineJob) -> Result<Robustness, StageError>;

    /// Computes group fairness metrics.
    async fn fairness(&self, job: &EngineJob, params: &FairnessParams) -> Result<FairnessReport, StageError>;

    /// Computes calibration, confidence intervals and adversarial robustness.
    async fn advanced_metrics(&self, job: &EngineJob) -> Result<AdvancedMetrics, StageError>;

    /// Produces a narrative diagnosis from the results gathered so far.
    async fn diagnose(&self, job: &EngineJob, results: &Value) -> Result<Diagnosis, StageError>;

    /// Renders the final report.
    async fn render_report(
        &self,
        job: &EngineJob,
        fairness: Option<&FairnessParams>,
        results: &Value,
    ) -> Result<RenderedReport, StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{merge, AuditPayload, StagePatch};
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_evaluation_keeps_problem_type_out_of_results() {
        let evaluation: Evaluation = serde_json::from_value(json!({
            "problem_type": "classification",
            "metrics": {"accuracy": 0.91},
            "n_samples": 100,
            "n_features": 8,
            "n_classes": 2,
            "artifact_path": "/a/eval.json"
        }))
        .unwrap();

        assert_eq!(evaluation.problem_type, "classification");
        let value = serde_json::to_value(&evaluation).unwrap();
        assert!(value.get("problem_type").is_none());
        assert_eq!(value["metrics"]["accuracy"], 0.91);
    }

    #[test]
    fn test_job_requires_loaded_records() {
        let owner = Uuid::new_v4();
        let ctx = AuditContext::new(
            AuditPayload::new(1, 1)
                .with_protected_attribute("sex", vec![json!("m")], vec![json!("f")])
                .into_request(owner),
        );
        assert!(EngineJob::from_context(&ctx).is_err());

        let ctx = merge(
            ctx,
            StagePatch::empty().with_records(
                DatasetRecord {
                    id: 1,
                    owner_id: owner,
                    name: "d".to_string(),
                    path: "/d.csv".to_string(),
                    file_format: "csv".to_string(),
                    target_column: "y".to_string(),
                },
                ModelRecord {
                    id: 1,
                    owner_id: owner,
                    name: "m".to_string(),
                    framework: "sklearn".to_string(),
                    task_type: None,
                    path: "/m.joblib".to_string(),
                },
            ),
        );
        let job = EngineJob::from_context(&ctx).unwrap();
        assert_eq!(job.exclude_columns, vec!["sex"]);

        let params = FairnessParams::from_context(&ctx).unwrap();
        assert_eq!(params.positive_label, json!(1));
    }
}
