//! Graph building and execution.
//!
//! This module provides:
//! - Stage and edge specifications, including conditional routing
//! - A graph builder with validation
//! - The sequential executor with progress reporting
//! - Retry utilities for writes that must not be lost

mod builder;
mod executor;
mod graph;
mod integration_tests;
mod retry;
mod spec;

pub use builder::GraphBuilder;
pub use executor::{ExecutorOptions, PipelineExecutor};
pub use graph::{
    AuditGraph, ConditionalEdgeDescription, EdgeDescription, GraphDescription, StageDescription,
};
pub use retry::{with_retry, BackoffStrategy, JitterStrategy, RetryConfig};
pub use spec::{ConditionalEdge, Edge, RouteFn, StageSpec, Target, END};
