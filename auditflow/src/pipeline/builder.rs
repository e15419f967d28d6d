//! Graph builder with validation.

use super::graph::AuditGraph;
use super::spec::{ConditionalEdge, Edge, RouteFn, StageSpec, Target};
use crate::errors::{ContractErrorInfo, CycleDetectedError, PipelineValidationError};
use crate::stages::Stage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Builder for creating validated audit graphs.
///
/// Stages and edges may be declared in any order; references are checked
/// when [`GraphBuilder::build`] runs.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    /// The graph name.
    name: String,
    /// The stage specifications.
    stages: HashMap<String, StageSpec>,
    /// Insertion order for stages.
    stage_order: Vec<String>,
    /// Outgoing edge per stage.
    edges: HashMap<String, Edge>,
    /// Declaration order for edges.
    edge_order: Vec<String>,
    /// Explicit entry stage.
    entry: Option<String>,
}

impl GraphBuilder {
    /// Creates a new graph builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: HashMap::new(),
            stage_order: Vec::new(),
            edges: HashMap::new(),
            edge_order: Vec::new(),
            entry: None,
        }
    }

    /// Adds a required stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already declared.
    pub fn stage(
        mut self,
        name: impl Into<String>,
        runner: Arc<dyn Stage>,
    ) -> Result<Self, PipelineValidationError> {
        self.add_stage_spec(StageSpec::new(name, runner))?;
        Ok(self)
    }

    /// Adds an advisory stage: its failure is recorded and the run continues.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already declared.
    pub fn advisory_stage(
        mut self,
        name: impl Into<String>,
        runner: Arc<dyn Stage>,
    ) -> Result<Self, PipelineValidationError> {
        self.add_stage_spec(StageSpec::new(name, runner).advisory())?;
        Ok(self)
    }

    /// Adds a stage with a specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already declared.
    pub fn add_stage_spec(&mut self, spec: StageSpec) -> Result<(), PipelineValidationError> {
        spec.validate()?;

        if self.stages.contains_key(&spec.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' is declared more than once",
                spec.name
            ))
            .with_stages(vec![spec.name.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "GRAPH-002-DUPLICATE",
                    format!("Duplicate stage name '{}'", spec.name),
                )
                .with_fix_hint("Give every stage in a graph a unique name."),
            ));
        }

        self.stage_order.push(spec.name.clone());
        self.stages.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Declares an unconditional edge.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` already has an outgoing edge.
    pub fn edge(
        mut self,
        from: impl Into<String>,
        to: impl Into<Target>,
    ) -> Result<Self, PipelineValidationError> {
        self.insert_edge(from.into(), Edge::Direct(to.into()))?;
        Ok(self)
    }

    /// Declares a conditional edge: `router` picks one of `targets` at run time.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` already has an outgoing edge.
    pub fn conditional_edge(
        mut self,
        from: impl Into<String>,
        label: impl Into<String>,
        router: RouteFn,
        targets: &[&str],
    ) -> Result<Self, PipelineValidationError> {
        let edge = ConditionalEdge {
            label: label.into(),
            router,
            targets: targets.iter().map(|t| Target::from(*t)).collect(),
        };
        self.insert_edge(from.into(), Edge::Conditional(edge))?;
        Ok(self)
    }

    /// Declares a linear chain of unconditional edges ending at the terminal marker.
    ///
    /// # Errors
    ///
    /// Returns an error if any link conflicts with an existing edge.
    pub fn chain(mut self, names: &[&str]) -> Result<Self, PipelineValidationError> {
        for pair in names.windows(2) {
            self.insert_edge(pair[0].to_string(), Edge::Direct(Target::from(pair[1])))?;
        }
        if let Some(last) = names.last() {
            self.insert_edge((*last).to_string(), Edge::Direct(Target::End))?;
        }
        Ok(self)
    }

    /// Sets the entry stage. Defaults to the first declared stage.
    #[must_use]
    pub fn entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// Returns the graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is empty, references unknown stages,
    /// has a cycle, or has stages unreachable from the entry.
    pub fn build(mut self) -> Result<AuditGraph, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Graph has no stages").with_error_info(
                ContractErrorInfo::new("GRAPH-001-EMPTY", "Cannot build an empty graph")
                    .with_fix_hint("Add at least one stage before building."),
            ));
        }

        let entry = match self.entry.take() {
            Some(entry) => entry,
            None => self.stage_order[0].clone(),
        };
        if !self.stages.contains_key(&entry) {
            return Err(PipelineValidationError::new(format!(
                "Entry stage '{entry}' is not declared"
            ))
            .with_stages(vec![entry.clone()])
            .with_error_info(
                ContractErrorInfo::new("GRAPH-006-NO_ENTRY", "The entry stage does not exist")
                    .with_fix_hint("Point the entry at a declared stage."),
            ));
        }

        self.check_references()?;

        for name in &self.stage_order {
            self.edges
                .entry(name.clone())
                .or_insert(Edge::Direct(Target::End));
        }

        self.detect_cycles()?;

        let order = self.execution_order(&entry);
        if order.len() < self.stages.len() {
            let reachable: HashSet<&String> = order.iter().collect();
            let unreachable: Vec<String> = self
                .stage_order
                .iter()
                .filter(|name| !reachable.contains(name))
                .cloned()
                .collect();
            return Err(PipelineValidationError::new(format!(
                "Stages not reachable from '{entry}': {}",
                unreachable.join(", ")
            ))
            .with_stages(unreachable)
            .with_error_info(
                ContractErrorInfo::new("GRAPH-007-UNREACHABLE", "Some stages can never run")
                    .with_fix_hint("Connect every stage to the entry or remove it."),
            ));
        }

        Ok(AuditGraph::new(self.name, entry, self.stages, self.edges, order))
    }

    fn insert_edge(&mut self, from: String, edge: Edge) -> Result<(), PipelineValidationError> {
        if self.edges.contains_key(&from) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{from}' already has an outgoing edge"
            ))
            .with_stages(vec![from.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "GRAPH-004-AMBIGUOUS_EDGE",
                    format!("Stage '{from}' declares more than one outgoing edge"),
                )
                .with_fix_hint("Use a conditional edge to choose between several targets."),
            ));
        }
        self.edge_order.push(from.clone());
        self.edges.insert(from, edge);
        Ok(())
    }

    fn check_references(&self) -> Result<(), PipelineValidationError> {
        for from in &self.edge_order {
            if !self.stages.contains_key(from) {
                return Err(unknown_target(from, from));
            }
            if let Some(edge) = self.edges.get(from) {
                for target in edge.targets() {
                    if let Target::Stage(name) = target {
                        if !self.stages.contains_key(name) {
                            return Err(unknown_target(from, name));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn successors(&self, node: &str) -> Vec<&str> {
        self.edges.get(node).map_or_else(Vec::new, |edge| {
            edge.targets()
                .into_iter()
                .filter_map(|target| match target {
                    Target::Stage(name) => Some(name.as_str()),
                    Target::End => None,
                })
                .collect()
        })
    }

    /// Detects cycles in the edge relation.
    fn detect_cycles(&self) -> Result<(), CycleDetectedError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for name in &self.stage_order {
            if !visited.contains(name) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut rec_stack, &mut path) {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        for next in self.successors(node) {
            if !visited.contains(next) {
                if let Some(cycle) = self.dfs_cycle(next, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(next) {
                let cycle_start = path.iter().position(|n| n == next).unwrap_or(0);
                let mut cycle: Vec<String> = path[cycle_start..].to_vec();
                cycle.push(next.to_string());
                return Some(cycle);
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }

    /// Topological order of the stages reachable from `entry`.
    fn execution_order(&self, entry: &str) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut postorder = Vec::new();
        self.visit(entry, &mut visited, &mut postorder);
        postorder.reverse();
        postorder
    }

    fn visit(&self, node: &str, visited: &mut HashSet<String>, postorder: &mut Vec<String>) {
        if !visited.insert(node.to_string()) {
            return;
        }
        for next in self.successors(node) {
            self.visit(next, visited, postorder);
        }
        postorder.push(node.to_string());
    }
}

fn unknown_target(from: &str, target: &str) -> PipelineValidationError {
    PipelineValidationError::new(format!(
        "Edge from '{from}' references unknown stage '{target}'"
    ))
    .with_stages(vec![from.to_string(), target.to_string()])
    .with_error_info(
        ContractErrorInfo::new(
            "GRAPH-003-UNKNOWN_TARGET",
            format!("Stage '{target}' not found"),
        )
        .with_context_entry("from", from)
        .with_fix_hint("Check for typos in stage names, or declare the stage."),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::NoOpStage;

    fn noop(name: &str) -> Arc<dyn Stage> {
        Arc::new(NoOpStage::new(name))
    }

    fn code(err: &PipelineValidationError) -> &str {
        err.code().unwrap_or_default()
    }

    #[test]
    fn test_empty_graph_rejected() {
        let err = GraphBuilder::new("empty").build().unwrap_err();
        assert_eq!(code(&err), "GRAPH-001-EMPTY");
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = GraphBuilder::new("g")
            .stage("load", noop("load"))
            .unwrap()
            .stage("load", noop("load"))
            .unwrap_err();
        assert_eq!(code(&err), "GRAPH-002-DUPLICATE");
    }

    #[test]
    fn test_unknown_target_rejected() {
        let err = GraphBuilder::new("g")
            .stage("load", noop("load"))
            .unwrap()
            .edge("load", "evaluate")
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(code(&err), "GRAPH-003-UNKNOWN_TARGET");
        assert_eq!(err.stages, vec!["load", "evaluate"]);
    }

    #[test]
    fn test_second_edge_rejected() {
        let err = GraphBuilder::new("g")
            .edge("a", "b")
            .unwrap()
            .edge("a", "c")
            .unwrap_err();
        assert_eq!(code(&err), "GRAPH-004-AMBIGUOUS_EDGE");
    }

    #[test]
    fn test_cycle_rejected_with_path() {
        let err = GraphBuilder::new("g")
            .stage("a", noop("a"))
            .unwrap()
            .stage("b", noop("b"))
            .unwrap()
            .edge("a", "b")
            .unwrap()
            .edge("b", "a")
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(code(&err), "GRAPH-005-CYCLE");
        assert_eq!(err.stages, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_missing_entry_rejected() {
        let err = GraphBuilder::new("g")
            .stage("a", noop("a"))
            .unwrap()
            .entry("missing")
            .build()
            .unwrap_err();
        assert_eq!(code(&err), "GRAPH-006-NO_ENTRY");
    }

    #[test]
    fn test_unreachable_stage_rejected() {
        let err = GraphBuilder::new("g")
            .stage("a", noop("a"))
            .unwrap()
            .stage("orphan", noop("orphan"))
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(code(&err), "GRAPH-007-UNREACHABLE");
        assert_eq!(err.stages, vec!["orphan"]);
    }

    #[test]
    fn test_chain_builds_in_order() {
        let graph = GraphBuilder::new("g")
            .stage("c", noop("c"))
            .unwrap()
            .stage("a", noop("a"))
            .unwrap()
            .stage("b", noop("b"))
            .unwrap()
            .entry("a")
            .chain(&["a", "b", "c"])
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(graph.execution_order(), &["a", "b", "c"]);
        assert_eq!(graph.entry(), "a");
    }

    #[test]
    fn test_stage_without_edge_routes_to_end() {
        let graph = GraphBuilder::new("g")
            .stage("only", noop("only"))
            .unwrap()
            .build()
            .unwrap();

        let description = graph.describe();
        assert_eq!(description.edges.len(), 1);
        assert_eq!(description.edges[0].to, "__end__");
    }
}
