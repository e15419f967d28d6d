//! Record of an advisory failure that did not abort the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record of a best-effort step that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Stage (or `stage.sub_step`) that failed.
    pub stage: String,
    /// Error message.
    pub error: String,
    /// Error type name.
    pub error_type: String,
    /// When the failure happened.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a new failure record.
    #[must_use]
    pub fn new(stage: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            error: error.into(),
            error_type: "Error".to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Sets the error type.
    #[must_use]
    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }
}
