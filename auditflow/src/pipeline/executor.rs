//! Sequential graph executor.

use super::graph::AuditGraph;
use super::spec::Target;
use crate::context::{merge, AuditContext};
use crate::core::{FailureRecord, ProgressUpdate, StageClass, StepStatus};
use crate::errors::{AuditflowError, StageFailure};
use crate::observability::StageTimer;
use crate::progress::{ProgressReporter, ProgressTracker};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Options for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Steps the caller performs after the graph finishes.
    ///
    /// They count toward the progress denominator, so the last stage
    /// completion reports a fraction below 1.0.
    pub trailing_steps: usize,
}

impl ExecutorOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of trailing steps.
    #[must_use]
    pub fn with_trailing_steps(mut self, steps: usize) -> Self {
        self.trailing_steps = steps;
        self
    }
}

/// Runs an [`AuditGraph`] one stage at a time, from the entry to the terminal marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineExecutor {
    options: ExecutorOptions,
}

impl PipelineExecutor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(options: ExecutorOptions) -> Self {
        Self { options }
    }

    /// Returns the executor options.
    #[must_use]
    pub fn options(&self) -> ExecutorOptions {
        self.options
    }

    /// Executes the graph.
    ///
    /// Each stage sees the context as merged after every stage before it.
    /// A required stage's error aborts the run; an advisory stage's error is
    /// recorded on the context and the run continues.
    ///
    /// # Errors
    ///
    /// Returns `StageFailed` for a required stage error and `Routing` when a
    /// router returns a target it did not declare.
    pub async fn run(
        &self,
        graph: &AuditGraph,
        ctx: AuditContext,
        reporter: &dyn ProgressReporter,
    ) -> Result<AuditContext, AuditflowError> {
        let run_id = ctx.run_id;
        let mut tracker = ProgressTracker::new(graph.stage_count() + self.options.trailing_steps);
        let mut ctx = ctx;
        let mut cursor = Target::stage(graph.entry());

        info!(graph = graph.name(), %run_id, stages = graph.stage_count(), "Audit run started");

        while let Target::Stage(name) = cursor {
            let (Some(spec), Some(ordinal)) = (graph.stage(&name), graph.ordinal(&name)) else {
                return Err(AuditflowError::Internal(format!(
                    "Graph '{}' has no stage '{name}'",
                    graph.name()
                )));
            };

            reporter.report(ProgressUpdate::new(&name, StepStatus::Running, tracker.at(ordinal)));

            let span = info_span!("stage", stage = %name, class = %spec.class, %run_id);
            let timer = StageTimer::start(&name);
            let outcome = spec.runner.run(&ctx).instrument(span).await;
            let duration_ms = timer.finish();

            match outcome {
                Ok(patch) => {
                    let status = if patch.is_skip() {
                        StepStatus::Skipped
                    } else {
                        StepStatus::Completed
                    };
                    let detail = patch.skip_reason.clone();
                    ctx = merge(ctx, patch);
                    debug!(stage = %name, %status, duration_ms, "Stage finished");
                    reporter.report(
                        ProgressUpdate::new(&name, status, tracker.at(ordinal + 1))
                            .with_optional_detail(detail),
                    );
                }
                Err(err) if spec.class == StageClass::Advisory => {
                    warn!(stage = %name, error = %err, duration_ms, "Advisory stage failed; continuing");
                    ctx.advisory_failures.push(
                        FailureRecord::new(&name, err.message.clone())
                            .with_error_type(err.error_type()),
                    );
                    reporter.report(
                        ProgressUpdate::new(&name, StepStatus::Failed, tracker.at(ordinal + 1))
                            .with_detail(err.message),
                    );
                }
                Err(err) => {
                    error!(stage = %name, error = %err, duration_ms, "Stage failed; aborting run");
                    reporter.report(
                        ProgressUpdate::new(&name, StepStatus::Failed, tracker.last())
                            .with_detail(err.message.clone()),
                    );
                    return Err(StageFailure::new(name, err).into());
                }
            }

            let next = graph.resolve_next(&name, &ctx)?;
            for skipped in graph.bypassed(&name, &next) {
                let finished = graph.ordinal(&skipped).map_or(ordinal + 1, |o| o + 1);
                reporter.report(
                    ProgressUpdate::new(&skipped, StepStatus::Skipped, tracker.at(finished))
                        .with_detail(format!("Not selected after '{name}'")),
                );
            }
            cursor = next;
        }

        info!(
            graph = graph.name(),
            %run_id,
            results = ctx.results.len(),
            advisory_failures = ctx.advisory_failures.len(),
            "Audit run finished"
        );
        Ok(ctx)
    }
}
