//! A validated audit graph and its serializable description.

use super::spec::{Edge, StageSpec, Target, END};
use crate::context::AuditContext;
use crate::core::StageClass;
use crate::errors::RoutingError;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// A validated graph of stages with at most one outgoing edge per stage.
#[derive(Debug, Clone)]
pub struct AuditGraph {
    /// The graph name.
    name: String,
    /// The entry stage.
    entry: String,
    /// Stage specifications.
    stages: HashMap<String, StageSpec>,
    /// Outgoing edge per stage.
    edges: HashMap<String, Edge>,
    /// Execution order (topologically sorted).
    execution_order: Vec<String>,
    /// Position of each stage in `execution_order`.
    ordinals: HashMap<String, usize>,
}

impl AuditGraph {
    pub(crate) fn new(
        name: String,
        entry: String,
        stages: HashMap<String, StageSpec>,
        edges: HashMap<String, Edge>,
        execution_order: Vec<String>,
    ) -> Self {
        let ordinals = execution_order
            .iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), index))
            .collect();

        Self {
            name,
            entry,
            stages,
            edges,
            execution_order,
            ordinals,
        }
    }

    /// Returns the graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the entry stage.
    #[must_use]
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Returns a stage specification.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.get(name)
    }

    /// Returns the stage's position in execution order.
    #[must_use]
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.ordinals.get(name).copied()
    }

    /// Resolves the stage to run after `from`, given the merged context.
    ///
    /// # Errors
    ///
    /// Returns a `RoutingError` if a router returns a target outside its declared set.
    pub fn resolve_next(&self, from: &str, ctx: &AuditContext) -> Result<Target, RoutingError> {
        match self.edges.get(from) {
            None => Ok(Target::End),
            Some(Edge::Direct(target)) => Ok(target.clone()),
            Some(Edge::Conditional(edge)) => {
                let target = (edge.router)(ctx);
                if edge.allows(&target) {
                    Ok(target)
                } else {
                    Err(RoutingError::new(from, target.as_str()))
                }
            }
        }
    }

    /// Stages that can no longer run once `chosen` was picked after `from`,
    /// in execution order.
    ///
    /// Covers the unchosen alternatives of a conditional edge and everything
    /// only reachable through them.
    #[must_use]
    pub fn bypassed(&self, from: &str, chosen: &Target) -> Vec<String> {
        let Some(Edge::Conditional(edge)) = self.edges.get(from) else {
            return Vec::new();
        };
        let still_reachable = self.reachable_from(chosen);
        let mut skipped: HashSet<String> = HashSet::new();
        for target in edge.targets.iter().filter(|t| *t != chosen) {
            skipped.extend(
                self.reachable_from(target)
                    .into_iter()
                    .filter(|name| !still_reachable.contains(name)),
            );
        }
        self.execution_order
            .iter()
            .filter(|name| skipped.contains(*name))
            .cloned()
            .collect()
    }

    /// Every stage reachable from `start`, including `start` itself.
    #[must_use]
    pub fn reachable_from(&self, start: &Target) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&Target> = vec![start];
        while let Some(target) = stack.pop() {
            let Target::Stage(name) = target else {
                continue;
            };
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(edge) = self.edges.get(name) {
                stack.extend(edge.targets());
            }
        }
        seen
    }

    /// Renders the graph for visualization and tests.
    #[must_use]
    pub fn describe(&self) -> GraphDescription {
        let mut edges = Vec::new();
        let mut conditional_edges = Vec::new();

        for name in &self.execution_order {
            match self.edges.get(name) {
                Some(Edge::Direct(target)) => edges.push(EdgeDescription {
                    from: name.clone(),
                    to: target.to_string(),
                }),
                Some(Edge::Conditional(edge)) => conditional_edges.push(ConditionalEdgeDescription {
                    from: name.clone(),
                    router: edge.label.clone(),
                    targets: edge.targets.iter().map(ToString::to_string).collect(),
                }),
                None => edges.push(EdgeDescription {
                    from: name.clone(),
                    to: END.to_string(),
                }),
            }
        }

        GraphDescription {
            name: self.name.clone(),
            entry: self.entry.clone(),
            stages: self
                .execution_order
                .iter()
                .filter_map(|name| self.stages.get(name))
                .map(|spec| StageDescription {
                    name: spec.name.clone(),
                    class: spec.class,
                })
                .collect(),
            edges,
            conditional_edges,
            end: END.to_string(),
        }
    }
}

/// Serializable view of an [`AuditGraph`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphDescription {
    /// Graph name.
    pub name: String,
    /// Entry stage.
    pub entry: String,
    /// Stages in execution order.
    pub stages: Vec<StageDescription>,
    /// Unconditional edges.
    pub edges: Vec<EdgeDescription>,
    /// Conditional edges.
    pub conditional_edges: Vec<ConditionalEdgeDescription>,
    /// The terminal marker.
    pub end: String,
}

/// A stage in a [`GraphDescription`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageDescription {
    /// Stage name.
    pub name: String,
    /// Whether the stage is required or advisory.
    pub class: StageClass,
}

/// An unconditional edge in a [`GraphDescription`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeDescription {
    /// Source stage.
    pub from: String,
    /// Target stage or terminal marker.
    pub to: String,
}

/// A conditional edge in a [`GraphDescription`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionalEdgeDescription {
    /// Source stage.
    pub from: String,
    /// Router name.
    pub router: String,
    /// Allowed targets.
    pub targets: Vec<String>,
}
