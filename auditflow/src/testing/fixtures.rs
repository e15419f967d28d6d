//! Shared fixtures: a seeded repository and a ready-to-use service bundle.

use super::engine::{ScriptedAgent, ScriptedEngine};
use crate::context::{merge, AuditContext, AuditPayload, DatasetRecord, ModelRecord, StagePatch};
use crate::services::{AuditServices, InMemoryRepository};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Id of the seeded dataset.
pub const DATASET_ID: i64 = 1;
/// Id of the seeded model.
pub const MODEL_ID: i64 = 1;

/// A fixed owner id.
#[must_use]
pub fn owner() -> Uuid {
    Uuid::from_u128(0x5eed_0000_0000_4000_8000_0000_0000_0001)
}

/// The seeded dataset.
#[must_use]
pub fn sample_dataset(owner_id: Uuid) -> DatasetRecord {
    DatasetRecord {
        id: DATASET_ID,
        owner_id,
        name: "credit".to_string(),
        path: "datasets/credit.csv".to_string(),
        file_format: "csv".to_string(),
        target_column: "approved".to_string(),
    }
}

/// The seeded model.
#[must_use]
pub fn sample_model(owner_id: Uuid) -> ModelRecord {
    ModelRecord {
        id: MODEL_ID,
        owner_id,
        name: "credit-gbm".to_string(),
        framework: "sklearn".to_string(),
        task_type: Some("classification".to_string()),
        path: "models/credit-gbm.joblib".to_string(),
    }
}

/// A repository holding the seeded dataset and model for `owner_id`.
#[must_use]
pub fn seeded_repository(owner_id: Uuid) -> InMemoryRepository {
    let repository = InMemoryRepository::new();
    repository.insert_dataset(sample_dataset(owner_id));
    repository.insert_model(sample_model(owner_id));
    repository
}

/// Scripted collaborators wired together for one test.
#[derive(Debug, Clone)]
pub struct TestHarness {
    /// Owner the seeded records belong to.
    pub owner: Uuid,
    /// Seeded repository.
    pub repository: Arc<InMemoryRepository>,
    /// Scripted engine.
    pub engine: Arc<ScriptedEngine>,
    /// Scripted agent.
    pub agent: Arc<ScriptedAgent>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Creates a harness with default scripted collaborators.
    #[must_use]
    pub fn new() -> Self {
        let owner = owner();
        Self {
            owner,
            repository: Arc::new(seeded_repository(owner)),
            engine: Arc::new(ScriptedEngine::new()),
            agent: Arc::new(ScriptedAgent::new()),
        }
    }

    /// Replaces the engine.
    #[must_use]
    pub fn with_engine(mut self, engine: ScriptedEngine) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    /// Replaces the agent.
    #[must_use]
    pub fn with_agent(mut self, agent: ScriptedAgent) -> Self {
        self.agent = Arc::new(agent);
        self
    }

    /// The service bundle backed by this harness.
    #[must_use]
    pub fn services(&self) -> AuditServices {
        AuditServices::new(self.repository.clone(), self.engine.clone()).with_agent(self.agent.clone())
    }

    /// A payload for the seeded records with no protected attribute.
    #[must_use]
    pub fn payload(&self) -> AuditPayload {
        AuditPayload::new(DATASET_ID, MODEL_ID)
    }

    /// A payload for the seeded records with `gender` as protected attribute.
    #[must_use]
    pub fn fairness_payload(&self) -> AuditPayload {
        self.payload()
            .with_protected_attribute("gender", vec![json!("male")], vec![json!("female")])
    }

    /// A context whose records have already been loaded.
    #[must_use]
    pub fn loaded_context(&self, payload: AuditPayload) -> AuditContext {
        let ctx = AuditContext::new(payload.into_request(self.owner));
        merge(
            ctx,
            StagePatch::empty().with_records(sample_dataset(self.owner), sample_model(self.owner)),
        )
    }
}
