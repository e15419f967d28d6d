//! The shared audit context threaded through a run, and its merge rule.

use super::bags::ResultBag;
use super::patch::StagePatch;
use super::records::{DatasetRecord, ModelRecord};
use super::request::AuditRequest;
use crate::core::FailureRecord;
use crate::errors::StageError;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

/// Accumulated state of one audit run.
///
/// Stages read it and return a [`StagePatch`]; [`merge`] folds patches in.
#[derive(Debug, Clone, Serialize)]
pub struct AuditContext {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// The request that started the run.
    pub request: AuditRequest,
    /// Resolved dataset.
    pub dataset: Option<DatasetRecord>,
    /// Resolved model.
    pub model: Option<ModelRecord>,
    /// Detected problem type.
    pub problem_type: Option<String>,
    /// Whether the advanced metrics branch should run.
    pub run_advanced: bool,
    /// Whether fairness analysis has a protected attribute to work with.
    pub run_fairness: bool,
    /// Additional top-level keys.
    pub extras: BTreeMap<String, Value>,
    /// Per-stage results.
    pub results: ResultBag,
    /// Agent insights.
    pub agent_insights: ResultBag,
    /// Best-effort steps that failed.
    pub advisory_failures: Vec<FailureRecord>,
}

impl AuditContext {
    /// Creates the initial context for a request.
    #[must_use]
    pub fn new(request: AuditRequest) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            request,
            dataset: None,
            model: None,
            problem_type: None,
            run_advanced: false,
            run_fairness: false,
            extras: BTreeMap::new(),
            results: ResultBag::new(),
            agent_insights: ResultBag::new(),
            advisory_failures: Vec::new(),
        }
    }

    /// Returns the resolved dataset.
    ///
    /// # Errors
    ///
    /// Returns an internal error if no stage has resolved it yet.
    pub fn dataset(&self) -> Result<&DatasetRecord, StageError> {
        self.dataset
            .as_ref()
            .ok_or_else(|| StageError::internal("Dataset has not been loaded"))
    }

    /// Returns the resolved model.
    ///
    /// # Errors
    ///
    /// Returns an internal error if no stage has resolved it yet.
    pub fn model(&self) -> Result<&ModelRecord, StageError> {
        self.model
            .as_ref()
            .ok_or_else(|| StageError::internal("Model has not been loaded"))
    }

    /// Looks up a results entry.
    #[must_use]
    pub fn result(&self, key: &str) -> Option<&Value> {
        self.results.get(key)
    }

    /// Returns true if a results entry exists.
    #[must_use]
    pub fn has_result(&self, key: &str) -> bool {
        self.results.contains_key(key)
    }
}

/// Merges a stage's patch into the context.
///
/// Keys the context does not have are added through [`ResultBag::set`]. A
/// stage writing a key another stage already wrote is a programming error:
/// debug builds panic, release builds log a warning and let the later write
/// win. Flags only ever rise.
#[must_use]
pub fn merge(mut base: AuditContext, patch: StagePatch) -> AuditContext {
    for (key, value) in patch.results {
        write_once(&mut base.results, "results", key, value);
    }
    for (key, value) in patch.insights {
        write_once(&mut base.agent_insights, "agent_insights", key, value);
    }
    for (key, value) in patch.extras {
        if let Some(previous) = base.extras.insert(key.clone(), value) {
            report_conflict("extras", &key, &previous);
        }
    }

    if let Some(dataset) = patch.dataset {
        replace_once(&mut base.dataset, dataset, "dataset");
    }
    if let Some(model) = patch.model {
        replace_once(&mut base.model, model, "model");
    }
    if let Some(problem_type) = patch.problem_type {
        replace_once(&mut base.problem_type, problem_type, "problem_type");
    }

    base.run_advanced |= patch.run_advanced.unwrap_or(false);
    base.run_fairness |= patch.run_fairness.unwrap_or(false);
    base.advisory_failures.extend(patch.advisory_failures);
    base
}

fn write_once(bag: &mut ResultBag, section: &str, key: String, value: Value) {
    if let Err(conflict) = bag.set(key.clone(), value.clone()) {
        if cfg!(debug_assertions) {
            panic!("{section} key '{key}' written twice: {conflict}");
        }
        warn!(section, key = %conflict.key, "Context key written twice; keeping the later value");
        bag.set_force(key, value);
    }
}

fn replace_once<T: PartialEq + std::fmt::Debug>(slot: &mut Option<T>, value: T, field: &str) {
    match slot {
        Some(existing) if *existing == value => {}
        Some(existing) => {
            if cfg!(debug_assertions) {
                panic!("context field '{field}' written twice: {existing:?}");
            }
            warn!(field, "Context field written twice; keeping the later value");
            *slot = Some(value);
        }
        None => *slot = Some(value),
    }
}

fn report_conflict(section: &str, key: &str, previous: &Value) {
    if cfg!(debug_assertions) {
        panic!("{section} key '{key}' written twice (previous: {previous})");
    }
    warn!(section, key, "Context key written twice; keeping the later value");
}
