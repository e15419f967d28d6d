//! Records resolved from the repository and persisted at the end of a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A registered tabular dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    /// Dataset id.
    pub id: i64,
    /// Owning user.
    pub owner_id: Uuid,
    /// Display name.
    pub name: String,
    /// Storage location of the data file.
    pub path: String,
    /// File format (`csv`, `parquet`).
    #[serde(default = "default_file_format")]
    pub file_format: String,
    /// Label column.
    pub target_column: String,
}

fn default_file_format() -> String {
    "csv".to_string()
}

/// A registered model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Model id.
    pub id: i64,
    /// Owning user.
    pub owner_id: Uuid,
    /// Display name.
    pub name: String,
    /// Training framework (`sklearn`, `xgboost`, ...).
    pub framework: String,
    /// Declared task type, if the uploader set one.
    #[serde(default)]
    pub task_type: Option<String>,
    /// Storage location of the artifact.
    pub path: String,
}

/// A completed analysis to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAnalysis {
    /// Owning user.
    pub owner_id: Uuid,
    /// Audited dataset.
    pub dataset_id: i64,
    /// Audited model.
    pub model_id: i64,
    /// Final status label.
    pub status: String,
    /// Full result payload.
    pub results: Value,
    /// Rendered report location, when produced.
    #[serde(default)]
    pub report_path: Option<String>,
}

/// A persisted analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Analysis id.
    pub id: i64,
    /// Owning user.
    pub owner_id: Uuid,
    /// Audited dataset.
    pub dataset_id: i64,
    /// Audited model.
    pub model_id: i64,
    /// Final status label.
    pub status: String,
    /// Full result payload.
    pub results: Value,
    /// Rendered report location.
    pub report_path: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    /// Materializes a new analysis under the given id.
    #[must_use]
    pub fn from_new(id: i64, analysis: NewAnalysis) -> Self {
        Self {
            id,
            owner_id: analysis.owner_id,
            dataset_id: analysis.dataset_id,
            model_id: analysis.model_id,
            status: analysis.status,
            results: analysis.results,
            report_path: analysis.report_path,
            created_at: Utc::now(),
        }
    }
}
