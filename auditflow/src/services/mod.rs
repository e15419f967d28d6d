//! External collaborators used by audit stages.
//!
//! This module provides:
//! - The repository for dataset, model and analysis records
//! - The analysis engine that performs the numerical work
//! - Insight agents for advisory narrative
//! - [`AuditServices`], the bundle injected into stages and the job manager

mod agents;
mod engine;
mod remote;
mod repository;

pub use agents::{
    AgentError, AgentKind, AgentResponse, DisabledInsightAgent, InsightAgent, LlmInsightAgent,
};
pub use engine::{
    AdvancedMetrics, AnalysisEngine, Diagnosis, EngineJob, Evaluation, Explanation, FairnessParams,
    FairnessReport, RenderedReport, Robustness, Sensitivity,
};
pub use remote::HttpAnalysisEngine;
pub use repository::{AuditRepository, Catalog, InMemoryRepository, RepositoryError};

use std::sync::Arc;

/// Collaborators shared by every stage of a run.
#[derive(Clone)]
pub struct AuditServices {
    /// Record lookup and persistence.
    pub repository: Arc<dyn AuditRepository>,
    /// Numerical analyses.
    pub engine: Arc<dyn AnalysisEngine>,
    /// Advisory insights.
    pub agent: Arc<dyn InsightAgent>,
}

impl std::fmt::Debug for AuditServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditServices")
            .field("repository", &self.repository)
            .field("engine", &self.engine)
            .field("agent", &self.agent)
            .finish()
    }
}

impl AuditServices {
    /// Creates a bundle with insights disabled.
    #[must_use]
    pub fn new(repository: Arc<dyn AuditRepository>, engine: Arc<dyn AnalysisEngine>) -> Self {
        Self {
            repository,
            engine,
            agent: Arc::new(DisabledInsightAgent),
        }
    }

    /// Sets the insight agent.
    #[must_use]
    pub fn with_agent(mut self, agent: Arc<dyn InsightAgent>) -> Self {
        self.agent = agent;
        self
    }
}
