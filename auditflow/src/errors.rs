//! Error types for auditflow.
//!
//! Build-time graph errors carry a [`ContractErrorInfo`] with a stable code.
//! Run-time stage errors carry an [`ErrorClass`] so job records can report a
//! classification next to the message.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// The main error type for auditflow operations.
#[derive(Debug, Error)]
pub enum AuditflowError {
    /// A graph failed validation while being built.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A required stage failed and aborted the run.
    #[error("{0}")]
    StageFailed(#[from] StageFailure),

    /// A router picked a target outside its declared set.
    #[error("{0}")]
    Routing(#[from] RoutingError),

    /// A dataset, model or other input record does not exist for the caller.
    #[error("{0}")]
    NotFound(String),

    /// No job exists with the given identifier.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The job state store rejected or failed an operation.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuditflowError {
    /// Returns the classification recorded on failed jobs.
    #[must_use]
    pub fn error_type(&self) -> String {
        match self {
            Self::Validation(_) => "PipelineValidationError".to_string(),
            Self::StageFailed(failure) => failure.source.error_type().to_string(),
            Self::Routing(_) => "RoutingError".to_string(),
            Self::NotFound(_) | Self::JobNotFound(_) => "NotFoundError".to_string(),
            Self::Store(_) => "StoreError".to_string(),
            Self::Serialization(_) => "SerializationError".to_string(),
            Self::Io(_) => "IoError".to_string(),
            Self::Internal(_) => "InternalError".to_string(),
        }
    }

    /// Returns true if the error means a requested record does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::JobNotFound(_) => true,
            Self::StageFailed(failure) => failure.source.class == ErrorClass::NotFound,
            _ => false,
        }
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-005-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when graph validation fails.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the stable error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in the graph's edge relation.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in graph: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "GRAPH-005-CYCLE",
            format!("Graph contains a cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the edges in the cycle; audit graphs must terminate.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            stages: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

/// Error raised when writing to an existing key in a results bag.
#[derive(Debug, Clone, Error)]
#[error("Result conflict: key '{key}' already written")]
pub struct ResultConflictError {
    /// The conflicting key.
    pub key: String,
}

impl ResultConflictError {
    /// Creates a new result conflict error.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Error raised when a router returns a target it did not declare.
#[derive(Debug, Clone, Error)]
#[error("Router after '{from}' returned undeclared target '{target}'")]
pub struct RoutingError {
    /// The stage whose outgoing edge was being resolved.
    pub from: String,
    /// The target the router returned.
    pub target: String,
}

impl RoutingError {
    /// Creates a new routing error.
    #[must_use]
    pub fn new(from: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            target: target.into(),
        }
    }
}

/// Broad classification of a stage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// A referenced record does not exist or is not visible to the caller.
    NotFound,
    /// The request itself is malformed.
    InvalidInput,
    /// Data did not satisfy what the analysis expects (columns, types, labels).
    DataContract,
    /// A downstream service failed or was unreachable.
    Upstream,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::InvalidInput => write!(f, "invalid_input"),
            Self::DataContract => write!(f, "data_contract"),
            Self::Upstream => write!(f, "upstream"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Error returned by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StageError {
    /// Error classification.
    pub class: ErrorClass,
    /// Human-readable message.
    pub message: String,
}

impl StageError {
    /// Creates a new stage error.
    #[must_use]
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::NotFound, message)
    }

    /// Creates an invalid-input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvalidInput, message)
    }

    /// Creates a data-contract error.
    #[must_use]
    pub fn data_contract(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::DataContract, message)
    }

    /// Creates an upstream error.
    #[must_use]
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Upstream, message)
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, message)
    }

    /// Returns the error type name recorded on failed jobs.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self.class {
            ErrorClass::NotFound => "NotFoundError",
            ErrorClass::InvalidInput => "InvalidInputError",
            ErrorClass::DataContract => "DataContractError",
            ErrorClass::Upstream => "UpstreamError",
            ErrorClass::Internal => "InternalError",
        }
    }
}

/// A required stage failed; the run was aborted.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' failed: {source}")]
pub struct StageFailure {
    /// Name of the failing stage.
    pub stage: String,
    /// The stage's error.
    pub source: StageError,
}

impl StageFailure {
    /// Creates a new stage failure.
    #[must_use]
    pub fn new(stage: impl Into<String>, source: StageError) -> Self {
        Self {
            stage: stage.into(),
            source,
        }
    }
}

/// Errors from a job state store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The job does not exist.
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    /// A job with the same id already exists.
    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    /// The requested transition is not allowed from the current state.
    #[error("Illegal transition for job {job_id}: {from} -> {to}")]
    IllegalTransition {
        /// The job id.
        job_id: String,
        /// Current state name.
        from: String,
        /// Requested state name.
        to: String,
    },

    /// The backing store could not be reached.
    #[error("Job store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("GRAPH-003-UNKNOWN_TARGET", "Unknown target")
            .with_fix_hint("Declare the stage first")
            .with_context_entry("stage", "load");

        assert_eq!(info.code, "GRAPH-003-UNKNOWN_TARGET");
        assert_eq!(info.fix_hint, Some("Declare the stage first".to_string()));
        assert_eq!(info.context.get("stage"), Some(&"load".to_string()));

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["code"], "GRAPH-003-UNKNOWN_TARGET");
        assert_eq!(value["context"]["stage"], "load");
    }

    #[test]
    fn test_pipeline_validation_error_serializes() {
        let err = PipelineValidationError::new("Graph has no stages")
            .with_stages(vec!["a".to_string()])
            .with_error_info(ContractErrorInfo::new("GRAPH-001-EMPTY", "empty"));

        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["message"], "Graph has no stages");
        assert_eq!(value["error_info"]["code"], "GRAPH-001-EMPTY");
        assert_eq!(err.code(), Some("GRAPH-001-EMPTY"));
    }

    #[test]
    fn test_cycle_detected_error_converts() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);
        assert!(err.to_string().contains("a -> b -> a"));

        let validation: PipelineValidationError = err.into();
        assert_eq!(validation.code(), Some("GRAPH-005-CYCLE"));
        assert_eq!(validation.stages.len(), 3);
    }

    #[test]
    fn test_stage_error_types() {
        assert_eq!(StageError::not_found("x").error_type(), "NotFoundError");
        assert_eq!(StageError::data_contract("x").error_type(), "DataContractError");
        assert_eq!(StageError::upstream("x").error_type(), "UpstreamError");
        assert_eq!(ErrorClass::InvalidInput.to_string(), "invalid_input");
    }

    #[test]
    fn test_stage_failure_classification() {
        let err: AuditflowError =
            StageFailure::new("load", StageError::not_found("Dataset 4 not found")).into();

        assert!(err.is_not_found());
        assert_eq!(err.error_type(), "NotFoundError");
        assert_eq!(err.to_string(), "Stage 'load' failed: Dataset 4 not found");
    }

    #[test]
    fn test_routing_error_message() {
        let err: AuditflowError = RoutingError::new("metrics", "nowhere").into();
        assert!(!err.is_not_found());
        assert_eq!(err.error_type(), "RoutingError");
        assert!(err.to_string().contains("nowhere"));
    }
}
