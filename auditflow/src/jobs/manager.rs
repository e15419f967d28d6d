//! The job manager: runs audits as addressable background jobs.

use super::state::{JobEvent, JobPhase, JobSnapshot, StepProgress};
use super::store::{InMemoryJobStore, JobStore};
use crate::audit::{AuditResponse, AuditRunner, GraphVariant};
use crate::context::{AuditContext, AuditRequest, NewAnalysis};
use crate::errors::AuditflowError;
use crate::pipeline::{with_retry, ExecutorOptions, RetryConfig};
use crate::progress::ChannelReporter;
use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Error type recorded when the pipeline task panics.
pub const WORKER_PANIC: &str = "WorkerPanic";
/// Error type recorded when the finished audit cannot be persisted.
pub const PERSISTENCE_ERROR: &str = "PersistenceError";

/// Tuning for the job manager.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSettings {
    /// Interval between status checks on an event stream.
    pub poll_interval: Duration,
    /// Pipelines allowed to execute at once.
    pub max_concurrent_jobs: usize,
    /// Maximum length of a recorded error, in characters.
    pub error_message_limit: usize,
    /// Retry policy for persistence and terminal writes.
    pub persistence_retry: RetryConfig,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_concurrent_jobs: 4,
            error_message_limit: 200,
            persistence_retry: RetryConfig::default(),
        }
    }
}

/// Truncates `message` to at most `limit` characters.
#[must_use]
pub fn truncate_error(message: &str, limit: usize) -> String {
    match message.char_indices().nth(limit) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}

/// Encodes a finished audit for the job's success record.
fn encode_result<T: Serialize>(response: &T) -> Result<Value, AuditflowError> {
    Ok(serde_json::to_value(response)?)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Submits audits, tracks them and exposes their status.
///
/// Each submission gets a UUID v4 id and runs on its own tokio task; at most
/// `max_concurrent_jobs` pipelines execute at once.
#[derive(Debug, Clone)]
pub struct JobManager {
    runner: AuditRunner,
    store: Arc<dyn JobStore>,
    settings: JobSettings,
    permits: Arc<Semaphore>,
}

impl JobManager {
    /// Creates a manager over `store`.
    #[must_use]
    pub fn new(runner: AuditRunner, store: Arc<dyn JobStore>, settings: JobSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1)));
        Self {
            runner,
            store,
            settings,
            permits,
        }
    }

    /// Creates a manager with an [`InMemoryJobStore`].
    #[must_use]
    pub fn in_memory(runner: AuditRunner, settings: JobSettings) -> Self {
        Self::new(runner, Arc::new(InMemoryJobStore::new()), settings)
    }

    /// The runner used for every job.
    #[must_use]
    pub fn runner(&self) -> &AuditRunner {
        &self.runner
    }

    /// The manager's settings.
    #[must_use]
    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// Validates the request and starts an audit in the background.
    ///
    /// Returns the pending snapshot immediately.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the dataset or model does not exist for the
    /// owner; no job is created in that case.
    pub async fn submit(
        &self,
        variant: GraphVariant,
        request: AuditRequest,
    ) -> Result<JobSnapshot, AuditflowError> {
        self.preflight(&request).await?;

        let job_id = Uuid::new_v4().to_string();
        let snapshot = self.store.create(&job_id).await?;
        info!(%job_id, %variant, dataset_id = request.dataset_id(), model_id = request.model_id(), "Audit job submitted");

        let manager = self.clone();
        tokio::spawn(async move { manager.supervise(job_id, variant, request).await });
        Ok(snapshot)
    }

    /// Latest snapshot of a job.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` for an unknown id.
    pub async fn status(&self, job_id: &str) -> Result<JobSnapshot, AuditflowError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| AuditflowError::JobNotFound(job_id.to_string()))
    }

    /// Polls a job until it is terminal, yielding each distinct snapshot once.
    ///
    /// The stream ends right after the first terminal snapshot. A transient
    /// store error skips one poll.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` for an unknown id.
    pub async fn stream(&self, job_id: &str) -> Result<BoxStream<'static, JobSnapshot>, AuditflowError> {
        self.status(job_id).await?;

        let store = Arc::clone(&self.store);
        let interval = self.settings.poll_interval;
        let job_id = job_id.to_string();

        Ok(Box::pin(stream! {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<JobSnapshot> = None;

            loop {
                ticker.tick().await;
                let snapshot = match store.get(&job_id).await {
                    Ok(Some(snapshot)) => snapshot,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(%job_id, error = %err, "Status poll failed; retrying");
                        continue;
                    }
                };
                if last.as_ref() == Some(&snapshot) {
                    continue;
                }
                let terminal = snapshot.is_terminal();
                last = Some(snapshot.clone());
                yield snapshot;
                if terminal {
                    break;
                }
            }
        }))
    }

    /// Like [`JobManager::stream`], but tags the terminal snapshot with an
    /// extra `Done` event.
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` for an unknown id.
    pub async fn events(&self, job_id: &str) -> Result<BoxStream<'static, JobEvent>, AuditflowError> {
        let snapshots = self.stream(job_id).await?;
        Ok(snapshots
            .flat_map(|snapshot| {
                let events = if snapshot.is_terminal() {
                    vec![JobEvent::Status(snapshot.clone()), JobEvent::Done(snapshot)]
                } else {
                    vec![JobEvent::Status(snapshot)]
                };
                futures::stream::iter(events)
            })
            .boxed())
    }

    async fn preflight(&self, request: &AuditRequest) -> Result<(), AuditflowError> {
        let repository = &self.runner.services().repository;
        let owner = request.owner_id;
        let unavailable = |e: crate::services::RepositoryError| AuditflowError::Internal(e.to_string());

        if repository
            .get_dataset(request.dataset_id(), owner)
            .await
            .map_err(unavailable)?
            .is_none()
        {
            return Err(AuditflowError::NotFound(format!("Dataset {} not found", request.dataset_id())));
        }
        if repository
            .get_model(request.model_id(), owner)
            .await
            .map_err(unavailable)?
            .is_none()
        {
            return Err(AuditflowError::NotFound(format!("Model {} not found", request.model_id())));
        }
        Ok(())
    }

    /// Runs the job on its own task and records a panic as a failure.
    async fn supervise(self, job_id: String, variant: GraphVariant, request: AuditRequest) {
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => {
                self.fail(&job_id, err.to_string(), "InternalError", None, None).await;
                return;
            }
        };

        let worker = self.clone();
        let id = job_id.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            worker.execute(&id, variant, request).await;
        });

        if let Err(join_err) = handle.await {
            let message = if join_err.is_panic() {
                format!("Worker panicked: {}", panic_message(join_err.into_panic().as_ref()))
            } else {
                "Worker task was cancelled".to_string()
            };
            error!(%job_id, error = %message, "Audit worker died");
            let last = self.store.get(&job_id).await.ok().flatten();
            let (step, progress) = last.map_or((None, None), |s| (s.step, s.progress));
            self.fail(&job_id, message, WORKER_PANIC, step, progress).await;
        }
    }

    async fn execute(&self, job_id: &str, variant: GraphVariant, request: AuditRequest) {
        self.write_progress(job_id, JobPhase::Running).await;

        let (reporter, updates) = ChannelReporter::channel();
        let writer = tokio::spawn(forward_progress(
            Arc::clone(&self.store),
            job_id.to_string(),
            updates,
        ));

        let outcome = self
            .runner
            .run(
                variant,
                request.clone(),
                &reporter,
                ExecutorOptions::default().with_trailing_steps(1),
            )
            .await;
        drop(reporter);
        let last_step = writer.await.ok().flatten();
        let last_progress = last_step.as_ref().map(|s| s.progress);

        match outcome {
            Ok(ctx) => self.complete(job_id, variant, &request, &ctx, last_progress).await,
            Err(err) => {
                let step = match &err {
                    AuditflowError::StageFailed(failure) => Some(failure.stage.clone()),
                    _ => last_step.map(|s| s.step),
                };
                warn!(%job_id, error = %err, "Audit job failed");
                self.fail(job_id, err.to_string(), &err.error_type(), step, last_progress)
                    .await;
            }
        }
    }

    async fn complete(
        &self,
        job_id: &str,
        variant: GraphVariant,
        request: &AuditRequest,
        ctx: &AuditContext,
        last_progress: Option<f64>,
    ) {
        let response = AuditResponse::from_context(variant, ctx);
        let mut result = match encode_result(&response) {
            Ok(result) => result,
            Err(err) => {
                error!(%job_id, error = %err, "Failed to encode audit result");
                self.fail(
                    job_id,
                    err.to_string(),
                    &err.error_type(),
                    Some("persist".to_string()),
                    last_progress,
                )
                .await;
                return;
            }
        };
        let analysis = NewAnalysis {
            owner_id: request.owner_id,
            dataset_id: request.dataset_id(),
            model_id: request.model_id(),
            status: response.status.clone(),
            results: response.results.clone(),
            report_path: ctx
                .result("report")
                .and_then(|report| report.get("txt_path"))
                .and_then(Value::as_str)
                .map(str::to_string),
        };

        let repository = &self.runner.services().repository;
        let persisted = with_retry(&self.settings.persistence_retry, "persist_analysis", || {
            repository.create_analysis(analysis.clone())
        })
        .await;

        match persisted {
            Ok(record) => {
                if let Some(map) = result.as_object_mut() {
                    map.insert("analysis_id".to_string(), Value::from(record.id));
                }
                info!(%job_id, analysis_id = record.id, "Audit job completed");
                self.write_terminal(
                    job_id,
                    JobPhase::Success {
                        result,
                        analysis_id: record.id,
                    },
                )
                .await;
            }
            Err(err) => {
                error!(%job_id, error = %err, "Failed to persist analysis");
                self.fail(
                    job_id,
                    format!("Failed to persist analysis: {err}"),
                    PERSISTENCE_ERROR,
                    Some("persist".to_string()),
                    last_progress,
                )
                .await;
            }
        }
    }

    async fn fail(
        &self,
        job_id: &str,
        message: String,
        error_type: &str,
        step: Option<String>,
        progress: Option<f64>,
    ) {
        let phase = JobPhase::Failure {
            error: truncate_error(&message, self.settings.error_message_limit),
            error_type: error_type.to_string(),
            step,
            progress,
        };
        self.write_terminal(job_id, phase).await;
    }

    /// Records a non-terminal phase; a store failure is logged and ignored.
    async fn write_progress(&self, job_id: &str, phase: JobPhase) {
        if let Err(err) = self.store.transition(job_id, phase).await {
            warn!(%job_id, error = %err, "Failed to record job progress; continuing");
        }
    }

    /// Records a terminal phase, retrying transient store failures.
    async fn write_terminal(&self, job_id: &str, phase: JobPhase) {
        let state = phase.state();
        let written = with_retry(&self.settings.persistence_retry, "job_terminal_state", || {
            self.store.transition(job_id, phase.clone())
        })
        .await;

        if let Err(err) = written {
            let original = match &phase {
                JobPhase::Failure { error, .. } => error.as_str(),
                _ => "",
            };
            error!(
                %job_id,
                %state,
                error = %err,
                original_error = original,
                "Failed to record terminal job state"
            );
        }
    }
}

async fn forward_progress(
    store: Arc<dyn JobStore>,
    job_id: String,
    mut updates: mpsc::UnboundedReceiver<crate::core::ProgressUpdate>,
) -> Option<StepProgress> {
    let mut last = None;
    while let Some(update) = updates.recv().await {
        let step = StepProgress::from(update);
        if let Err(err) = store.transition(&job_id, JobPhase::Progress(step.clone())).await {
            warn!(%job_id, step = %step.step, error = %err, "Failed to record job progress; continuing");
        } else {
            debug!(%job_id, step = %step.step, progress = step.progress, "Job progress");
        }
        last = Some(step);
    }
    last
}
