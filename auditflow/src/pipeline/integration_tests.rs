//! Integration tests for building and executing branching graphs.

#[cfg(test)]
mod tests {
    use crate::context::{AuditContext, AuditPayload, StagePatch};
    use crate::core::StepStatus;
    use crate::errors::{AuditflowError, StageError};
    use crate::pipeline::{ExecutorOptions, GraphBuilder, PipelineExecutor, Target};
    use crate::progress::CollectingReporter;
    use crate::stages::{NoOpStage, Stage};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Debug)]
    struct CountingStage {
        name: String,
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Stage for CountingStage {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(&self, _ctx: &AuditContext) -> Result<StagePatch, StageError> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(StagePatch::result(&self.name, json!({"count": n})))
        }
    }

    /// Raises the advanced flag when the scripted accuracy is below a threshold.
    #[derive(Debug)]
    struct GateStage {
        accuracy: f64,
    }

    #[async_trait]
    impl Stage for GateStage {
        fn name(&self) -> &str {
            "metrics"
        }

        async fn run(&self, _ctx: &AuditContext) -> Result<StagePatch, StageError> {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(StagePatch::result("metrics", json!({"accuracy": self.accuracy}))
                .with_run_advanced(self.accuracy < 0.8))
        }
    }

    #[derive(Debug)]
    struct FlakyStage {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Stage for FlakyStage {
        fn name(&self) -> &str {
            "explain"
        }

        async fn run(&self, _ctx: &AuditContext) -> Result<StagePatch, StageError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StageError::upstream("worker restarting"))
            } else {
                Ok(StagePatch::result("explain", json!({})))
            }
        }
    }

    fn context() -> AuditContext {
        AuditContext::new(AuditPayload::new(1, 1).into_request(Uuid::new_v4()))
    }

    fn counting(name: &str, counter: &Arc<AtomicUsize>) -> Arc<dyn Stage> {
        Arc::new(CountingStage {
            name: name.to_string(),
            counter: Arc::clone(counter),
        })
    }

    fn route_on_flag(ctx: &AuditContext) -> Target {
        if ctx.run_advanced {
            Target::stage("deep_dive")
        } else {
            Target::stage("summary")
        }
    }

    fn branching(accuracy: f64, counter: &Arc<AtomicUsize>) -> crate::pipeline::AuditGraph {
        GraphBuilder::new("branching")
            .stage("metrics", Arc::new(GateStage { accuracy }))
            .unwrap()
            .stage("deep_dive", counting("deep_dive", counter))
            .unwrap()
            .stage("summary", counting("summary", counter))
            .unwrap()
            .conditional_edge("metrics", "needs_deep_dive", route_on_flag, &["deep_dive", "summary"])
            .unwrap()
            .edge("deep_dive", "summary")
            .unwrap()
            .edge("summary", "__end__")
            .unwrap()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_router_sees_flag_set_by_source_stage() {
        let counter = Arc::new(AtomicUsize::new(0));
        let graph = branching(0.6, &counter);

        let ctx = PipelineExecutor::default()
            .run(&graph, context(), &CollectingReporter::new())
            .await
            .unwrap();

        assert!(ctx.run_advanced);
        assert_eq!(ctx.results.keys(), vec!["deep_dive", "metrics", "summary"]);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bypassed_branch_is_reported_skipped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let graph = branching(0.95, &counter);
        let reporter = CollectingReporter::new();

        let ctx = PipelineExecutor::default()
            .run(&graph, context(), &reporter)
            .await
            .unwrap();

        assert!(!ctx.has_result("deep_dive"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let skipped = reporter.for_step("deep_dive");
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].status, StepStatus::Skipped);

        let last = reporter.updates().pop().unwrap();
        assert_eq!(last.step, "summary");
        assert!((last.progress - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_graph_is_reusable_across_concurrent_runs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let graph = Arc::new(branching(0.6, &counter));
        let executor = PipelineExecutor::new(ExecutorOptions::new().with_trailing_steps(1));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let graph = Arc::clone(&graph);
            handles.push(tokio::spawn(async move {
                executor.run(&graph, context(), &CollectingReporter::new()).await
            }));
        }

        let mut run_ids = Vec::new();
        for handle in handles {
            let ctx = handle.await.unwrap().unwrap();
            assert_eq!(ctx.results.len(), 3);
            run_ids.push(ctx.run_id);
        }
        run_ids.sort();
        run_ids.dedup();
        assert_eq!(run_ids.len(), 4);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_failed_stage_keeps_nothing_from_later_stages() {
        let counter = Arc::new(AtomicUsize::new(0));
        let flaky: Arc<dyn Stage> = Arc::new(FlakyStage {
            attempts: AtomicUsize::new(0),
        });
        let graph = GraphBuilder::new("flaky")
            .stage("load", counting("load", &counter))
            .unwrap()
            .stage("explain", Arc::clone(&flaky))
            .unwrap()
            .stage("report", counting("report", &counter))
            .unwrap()
            .chain(&["load", "explain", "report"])
            .unwrap()
            .build()
            .unwrap();

        let first = PipelineExecutor::default()
            .run(&graph, context(), &CollectingReporter::new())
            .await;
        match first {
            Err(AuditflowError::StageFailed(failure)) => assert_eq!(failure.stage, "explain"),
            other => panic!("expected stage failure, got {other:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let second = PipelineExecutor::default()
            .run(&graph, context(), &CollectingReporter::new())
            .await
            .unwrap();
        assert!(second.has_result("report"));
    }

    #[tokio::test]
    async fn test_advisory_noop_stages_complete() {
        let graph = GraphBuilder::new("noop")
            .stage("load", Arc::new(NoOpStage::new("load")))
            .unwrap()
            .advisory_stage("diagnose", Arc::new(NoOpStage::new("diagnose")))
            .unwrap()
            .chain(&["load", "diagnose"])
            .unwrap()
            .build()
            .unwrap();
        let reporter = CollectingReporter::new();

        let ctx = PipelineExecutor::default()
            .run(&graph, context(), &reporter)
            .await
            .unwrap();

        assert!(ctx.results.is_empty());
        assert!(ctx.advisory_failures.is_empty());
        assert_eq!(reporter.len(), 4);
        assert!(reporter
            .updates()
            .iter()
            .all(|u| u.status != StepStatus::Failed));
    }
}
