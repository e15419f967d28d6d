//! Dataset, model and analysis records.

use crate::context::{AnalysisRecord, DatasetRecord, ModelRecord, NewAnalysis};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use uuid::Uuid;

/// Errors from a repository backend.
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    /// The backend could not be reached or rejected the operation.
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    /// A catalog file could not be read.
    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),
}

/// Lookup and persistence of audit inputs and outputs.
///
/// Lookups are scoped to an owner; a record owned by someone else is
/// reported as absent.
#[async_trait]
pub trait AuditRepository: Send + Sync + Debug {
    /// Fetches a dataset visible to `owner`.
    async fn get_dataset(&self, id: i64, owner: Uuid) -> Result<Option<DatasetRecord>, RepositoryError>;

    /// Fetches a model visible to `owner`.
    async fn get_model(&self, id: i64, owner: Uuid) -> Result<Option<ModelRecord>, RepositoryError>;

    /// Persists a completed analysis.
    async fn create_analysis(&self, analysis: NewAnalysis) -> Result<AnalysisRecord, RepositoryError>;
}

/// On-disk catalog format for seeding an [`InMemoryRepository`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    /// Registered datasets.
    #[serde(default)]
    pub datasets: Vec<DatasetRecord>,
    /// Registered models.
    #[serde(default)]
    pub models: Vec<ModelRecord>,
}

/// A thread-safe in-memory repository.
#[derive(Debug)]
pub struct InMemoryRepository {
    datasets: DashMap<i64, DatasetRecord>,
    models: DashMap<i64, ModelRecord>,
    analyses: DashMap<i64, AnalysisRecord>,
    next_analysis_id: AtomicI64,
}

impl InMemoryRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            datasets: DashMap::new(),
            models: DashMap::new(),
            analyses: DashMap::new(),
            next_analysis_id: AtomicI64::new(1),
        }
    }

    /// Creates a repository seeded from a catalog.
    #[must_use]
    pub fn from_catalog(catalog: Catalog) -> Self {
        let repo = Self::new();
        for dataset in catalog.datasets {
            repo.insert_dataset(dataset);
        }
        for model in catalog.models {
            repo.insert_model(model);
        }
        repo
    }

    /// Loads a JSON catalog file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCatalog` if the file cannot be read or parsed.
    pub fn load_catalog(path: &Path) -> Result<Self, RepositoryError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RepositoryError::InvalidCatalog(format!("{}: {e}", path.display())))?;
        let catalog: Catalog = serde_json::from_str(&text)
            .map_err(|e| RepositoryError::InvalidCatalog(format!("{}: {e}", path.display())))?;
        Ok(Self::from_catalog(catalog))
    }

    /// Registers a dataset.
    pub fn insert_dataset(&self, dataset: DatasetRecord) {
        self.datasets.insert(dataset.id, dataset);
    }

    /// Registers a model.
    pub fn insert_model(&self, model: ModelRecord) {
        self.models.insert(model.id, model);
    }

    /// Returns a persisted analysis.
    #[must_use]
    pub fn analysis(&self, id: i64) -> Option<AnalysisRecord> {
        self.analyses.get(&id).map(|entry| entry.value().clone())
    }

    /// Returns the number of persisted analyses.
    #[must_use]
    pub fn analysis_count(&self) -> usize {
        self.analyses.len()
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditRepository for InMemoryRepository {
    async fn get_dataset(&self, id: i64, owner: Uuid) -> Result<Option<DatasetRecord>, RepositoryError> {
        Ok(self
            .datasets
            .get(&id)
            .filter(|entry| entry.owner_id == owner)
            .map(|entry| entry.value().clone()))
    }

    async fn get_model(&self, id: i64, owner: Uuid) -> Result<Option<ModelRecord>, RepositoryError> {
        Ok(self
            .models
            .get(&id)
            .filter(|entry| entry.owner_id == owner)
            .map(|entry| entry.value().clone()))
    }

    async fn create_analysis(&self, analysis: NewAnalysis) -> Result<AnalysisRecord, RepositoryError> {
        let id = self.next_analysis_id.fetch_add(1, Ordering::SeqCst);
        let record = AnalysisRecord::from_new(id, analysis);
        self.analyses.insert(id, record.clone());
        Ok(record)
    }
}
