//! Stage and edge specifications for audit graphs.

use crate::context::AuditContext;
use crate::core::StageClass;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::stages::Stage;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Name used for the terminal marker in descriptions.
pub const END: &str = "__end__";

/// Where an edge leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Another stage.
    Stage(String),
    /// The terminal marker; the run finishes.
    End,
}

impl Target {
    /// Creates a stage target.
    #[must_use]
    pub fn stage(name: impl Into<String>) -> Self {
        Self::Stage(name.into())
    }

    /// Returns the target name, using [`END`] for the terminal marker.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stage(name) => name,
            Self::End => END,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        if name == END {
            Self::End
        } else {
            Self::Stage(name.to_string())
        }
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Routing function evaluated against the context after the source stage merged.
pub type RouteFn = fn(&AuditContext) -> Target;

/// An edge whose target is chosen at run time from a declared set.
#[derive(Debug, Clone)]
pub struct ConditionalEdge {
    /// Human-readable router name.
    pub label: String,
    /// The routing function.
    pub router: RouteFn,
    /// Every target the router may return.
    pub targets: Vec<Target>,
}

impl ConditionalEdge {
    /// Returns true if the router may return `target`.
    #[must_use]
    pub fn allows(&self, target: &Target) -> bool {
        self.targets.contains(target)
    }
}

/// The outgoing edge of a stage.
#[derive(Debug, Clone)]
pub enum Edge {
    /// Always go to the target.
    Direct(Target),
    /// Ask the router.
    Conditional(ConditionalEdge),
}

impl Edge {
    /// Every target this edge can lead to.
    #[must_use]
    pub fn targets(&self) -> Vec<&Target> {
        match self {
            Self::Direct(target) => vec![target],
            Self::Conditional(edge) => edge.targets.iter().collect(),
        }
    }
}

/// Specification for a single stage in a graph.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
    /// Whether the stage's failure aborts the run.
    pub class: StageClass,
}

impl StageSpec {
    /// Creates a new required stage specification.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            runner,
            class: StageClass::Required,
        }
    }

    /// Marks the stage as advisory.
    #[must_use]
    pub fn advisory(mut self) -> Self {
        self.class = StageClass::Advisory;
        self
    }

    /// Validates the stage specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or collides with the terminal marker.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        let trimmed = self.name.trim();
        if trimmed.is_empty() || trimmed == END {
            return Err(PipelineValidationError::new(format!(
                "Invalid stage name '{}'",
                self.name
            ))
            .with_stages(vec![self.name.clone()])
            .with_error_info(
                ContractErrorInfo::new("GRAPH-000-INVALID_NAME", "Stage names must be non-blank")
                    .with_fix_hint(format!("Use a descriptive name other than '{END}'.")),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::NoOpStage;

    #[test]
    fn test_target_names() {
        assert_eq!(Target::End.as_str(), "__end__");
        assert_eq!(Target::stage("xai").to_string(), "xai");
        assert_eq!(Target::from("__end__"), Target::End);
        assert_eq!(serde_json::to_string(&Target::stage("report")).unwrap(), "\"report\"");
    }

    #[test]
    fn test_stage_spec_validate() {
        let runner: Arc<dyn Stage> = Arc::new(NoOpStage::new("x"));
        assert!(StageSpec::new("load", runner.clone()).validate().is_ok());
        assert!(StageSpec::new(" ", runner.clone()).validate().is_err());
        assert!(StageSpec::new(END, runner).validate().is_err());
    }
}
