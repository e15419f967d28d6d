//! Stage trait and implementations.
//!
//! Stages are the units of work an audit graph is made of. A stage reads the
//! shared context and returns the keys it adds; it never mutates the context.

mod advisory;

pub use advisory::best_effort;

use crate::context::{AuditContext, StagePatch};
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for audit stages.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Runs the stage against the current context.
    ///
    /// # Returns
    ///
    /// The keys to merge into the context, or the error that stopped the stage.
    async fn run(&self, ctx: &AuditContext) -> Result<StagePatch, StageError>;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&AuditContext) -> Result<StagePatch, StageError> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&AuditContext) -> Result<StagePatch, StageError> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&AuditContext) -> Result<StagePatch, StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&AuditContext) -> Result<StagePatch, StageError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &AuditContext) -> Result<StagePatch, StageError> {
        (self.func)(ctx)
    }
}

/// A stage that adds nothing.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &AuditContext) -> Result<StagePatch, StageError> {
        Ok(StagePatch::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AuditPayload;
    use serde_json::json;
    use uuid::Uuid;

    fn test_context() -> AuditContext {
        AuditContext::new(AuditPayload::new(1, 1).into_request(Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("evaluate", |_ctx| {
            Ok(StagePatch::result("evaluate", json!({"n_samples": 4})))
        });

        assert_eq!(stage.name(), "evaluate");

        let patch = stage.run(&test_context()).await.unwrap();
        assert_eq!(patch.results["evaluate"]["n_samples"], 4);
    }

    #[tokio::test]
    async fn test_fn_stage_error() {
        let stage = FnStage::new("load", |_ctx| Err(StageError::not_found("Dataset 1 not found")));

        let err = stage.run(&test_context()).await.unwrap_err();
        assert_eq!(err.error_type(), "NotFoundError");
    }

    #[tokio::test]
    async fn test_noop_stage() {
        let stage = NoOpStage::new("noop");
        let patch = stage.run(&test_context()).await.unwrap();
        assert_eq!(patch, StagePatch::empty());
    }
}
