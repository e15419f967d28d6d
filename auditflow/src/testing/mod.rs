//! Testing utilities for audit pipelines.
//!
//! This module provides:
//! - A deterministic analysis engine and insight agent with failure injection
//! - A job store that fails on demand
//! - Seeded fixtures

mod engine;
mod fixtures;
mod store;

pub use engine::{ScriptedAgent, ScriptedEngine};
pub use fixtures::{
    owner, sample_dataset, sample_model, seeded_repository, TestHarness, DATASET_ID, MODEL_ID,
};
pub use store::FlakyJobStore;
