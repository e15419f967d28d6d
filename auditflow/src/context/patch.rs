//! Partial context returned by a stage.

use super::records::{DatasetRecord, ModelRecord};
use crate::core::FailureRecord;
use serde_json::Value;
use std::collections::BTreeMap;

/// The keys a stage adds to the shared context.
///
/// A stage never mutates the context it reads; it returns a patch and the
/// executor merges it. Factory methods mirror the common shapes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagePatch {
    /// Entries for `results`.
    pub results: BTreeMap<String, Value>,
    /// Entries for `agent_insights`.
    pub insights: BTreeMap<String, Value>,
    /// Resolved dataset.
    pub dataset: Option<DatasetRecord>,
    /// Resolved model.
    pub model: Option<ModelRecord>,
    /// Detected problem type.
    pub problem_type: Option<String>,
    /// Raises the advanced-analysis flag.
    pub run_advanced: Option<bool>,
    /// Raises the fairness flag.
    pub run_fairness: Option<bool>,
    /// Additional top-level keys.
    pub extras: BTreeMap<String, Value>,
    /// Set when the stage declined to do its work.
    pub skip_reason: Option<String>,
    /// Best-effort sub-steps that failed inside the stage.
    pub advisory_failures: Vec<FailureRecord>,
}

impl StagePatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a patch with a single results entry.
    #[must_use]
    pub fn result(key: impl Into<String>, value: Value) -> Self {
        Self::empty().with_result(key, value)
    }

    /// Creates a patch for a stage that skipped its work.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skip_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Adds a results entry.
    #[must_use]
    pub fn with_result(mut self, key: impl Into<String>, value: Value) -> Self {
        self.results.insert(key.into(), value);
        self
    }

    /// Adds an `agent_insights` entry.
    #[must_use]
    pub fn with_insight(mut self, key: impl Into<String>, value: Value) -> Self {
        self.insights.insert(key.into(), value);
        self
    }

    /// Sets the resolved input records.
    #[must_use]
    pub fn with_records(mut self, dataset: DatasetRecord, model: ModelRecord) -> Self {
        self.dataset = Some(dataset);
        self.model = Some(model);
        self
    }

    /// Sets the problem type.
    #[must_use]
    pub fn with_problem_type(mut self, problem_type: impl Into<String>) -> Self {
        self.problem_type = Some(problem_type.into());
        self
    }

    /// Sets the advanced-analysis flag.
    #[must_use]
    pub fn with_run_advanced(mut self, value: bool) -> Self {
        self.run_advanced = Some(value);
        self
    }

    /// Sets the fairness flag.
    #[must_use]
    pub fn with_run_fairness(mut self, value: bool) -> Self {
        self.run_fairness = Some(value);
        self
    }

    /// Adds an extra top-level key.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    /// Records a failed best-effort sub-step.
    #[must_use]
    pub fn with_advisory_failure(mut self, record: FailureRecord) -> Self {
        self.advisory_failures.push(record);
        self
    }

    /// Returns true if the stage reported a skip.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        self.skip_reason.is_some()
    }
}
