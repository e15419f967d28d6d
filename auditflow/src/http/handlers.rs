//! Route handlers.

use super::error::{ApiError, OwnerId};
use super::AppState;
use crate::audit::{AuditResponse, GraphVariant};
use crate::context::AuditPayload;
use crate::jobs::JobSnapshot;
use crate::pipeline::GraphDescription;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use tracing::debug;

/// GET /health
pub(crate) async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /audit/full: queue a basic audit as a background job.
pub(crate) async fn submit_audit(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Json(payload): Json<AuditPayload>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let snapshot = state
        .jobs
        .submit(GraphVariant::Basic, payload.into_request(owner))
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "job_id": snapshot.job_id, "state": snapshot.state })),
    ))
}

/// GET /audit/full/:job_id
pub(crate) async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    Ok(Json(state.jobs.status(&job_id).await?))
}

/// GET /audit/full/:job_id/events: `status` on every change, then one `done`.
pub(crate) async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = state.jobs.events(&job_id).await?;
    debug!(%job_id, "Event stream opened");

    let stream = events.map(|event| {
        let data = serde_json::to_string(event.snapshot()).unwrap_or_default();
        Ok(Event::default().event(event.name()).data(data))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// POST /audit/graph: run the basic graph within the request.
pub(crate) async fn run_basic(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Json(payload): Json<AuditPayload>,
) -> Result<Json<AuditResponse>, ApiError> {
    run_sync(&state, GraphVariant::Basic, owner, payload).await
}

/// POST /audit/graph/advanced: run the advanced graph within the request.
pub(crate) async fn run_advanced(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Json(payload): Json<AuditPayload>,
) -> Result<Json<AuditResponse>, ApiError> {
    run_sync(&state, GraphVariant::Advanced, owner, payload).await
}

async fn run_sync(
    state: &AppState,
    variant: GraphVariant,
    owner: uuid::Uuid,
    payload: AuditPayload,
) -> Result<Json<AuditResponse>, ApiError> {
    let response = state
        .runner()
        .run_sync(variant, payload.into_request(owner))
        .await?;
    Ok(Json(response))
}

/// GET /audit/graph/:variant/describe
pub(crate) async fn describe_graph(
    State(state): State<AppState>,
    Path(variant): Path<String>,
) -> Result<Json<GraphDescription>, ApiError> {
    let variant: GraphVariant = variant
        .parse()
        .map_err(|_| ApiError::not_found(format!("Unknown graph variant '{variant}'")))?;
    Ok(Json(state.runner().describe(variant)))
}

#[cfg(test)]
mod tests {
    use crate::audit::AuditRunner;
    use crate::config::Settings;
    use crate::errors::StageError;
    use crate::http::{router, AppState, OWNER_HEADER};
    use crate::jobs::{JobManager, JobSettings};
    use crate::testing::{ScriptedEngine, TestHarness};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(harness: &TestHarness) -> Router {
        let runner = AuditRunner::new(harness.services(), &Settings::default()).unwrap();
        let settings = JobSettings {
            poll_interval: Duration::from_millis(5),
            ..JobSettings::default()
        };
        router(AppState::new(JobManager::in_memory(runner, settings)))
    }

    fn post(uri: &str, owner: Option<String>, body: &Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(owner) = owner {
            builder = builder.header(OWNER_HEADER, owner);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(&TestHarness::new()).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_missing_owner_is_unauthorized() {
        let response = app(&TestHarness::new())
            .oneshot(post("/audit/graph", None, &json!({"dataset_id": 1, "model_id": 1})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(&TestHarness::new())
            .oneshot(post(
                "/audit/graph",
                Some("not-a-uuid".to_string()),
                &json!({"dataset_id": 1, "model_id": 1}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["detail"], "Invalid caller identity");
    }

    #[tokio::test]
    async fn test_sync_basic_run() {
        let harness = TestHarness::new();
        let response = app(&harness)
            .oneshot(post(
                "/audit/graph",
                Some(harness.owner.to_string()),
                &json!({"dataset_id": 1, "model_id": 1}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["problem_type"], "classification");
        assert_eq!(body["results"]["fairness"]["skipped"], true);
        assert!(body["results"].get("agent_insights").is_none());
    }

    #[tokio::test]
    async fn test_sync_advanced_run_includes_insights() {
        let harness = TestHarness::new();
        let response = app(&harness)
            .oneshot(post(
                "/audit/graph/advanced",
                Some(harness.owner.to_string()),
                &json!({
                    "dataset_id": 1,
                    "model_id": 1,
                    "sensitive_attribute": "gender",
                    "privileged_values": ["male"],
                    "unprivileged_values": ["female"]
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["results"]["agent_insights"]["metrics"].is_object());
        assert!(body["results"]["synthesis"].is_object());
    }

    #[tokio::test]
    async fn test_sync_unknown_model_is_404() {
        let harness = TestHarness::new();
        let response = app(&harness)
            .oneshot(post(
                "/audit/graph",
                Some(harness.owner.to_string()),
                &json!({"dataset_id": 1, "model_id": 77}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["detail"], "Model 77 not found");
    }

    #[tokio::test]
    async fn test_sync_stage_error_is_500_with_message() {
        let harness = TestHarness::new()
            .with_engine(ScriptedEngine::new().with_failure("explain", StageError::upstream("shap exploded")));
        let response = app(&harness)
            .oneshot(post(
                "/audit/graph",
                Some(harness.owner.to_string()),
                &json!({"dataset_id": 1, "model_id": 1}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let detail = body_json(response).await["detail"].as_str().unwrap().to_string();
        assert!(detail.contains("shap exploded"));
    }

    #[tokio::test]
    async fn test_submit_then_poll_and_stream() {
        let harness = TestHarness::new();
        let app = app(&harness);

        let response = app
            .clone()
            .oneshot(post(
                "/audit/full",
                Some(harness.owner.to_string()),
                &json!({"dataset_id": 1, "model_id": 1}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["state"], "PENDING");
        let job_id = body["job_id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(get(&format!("/audit/full/{job_id}/events")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = tokio::time::timeout(
            Duration::from_secs(10),
            to_bytes(response.into_body(), usize::MAX),
        )
        .await
        .unwrap()
        .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text.matches("event: done").count(), 1);
        assert!(text.contains("event: status"));

        let response = app
            .oneshot(get(&format!("/audit/full/{job_id}")))
            .await
            .unwrap();
        let snapshot = body_json(response).await;
        assert_eq!(snapshot["state"], "SUCCESS");
        assert_eq!(snapshot["progress"], 1.0);
        assert!(snapshot["analysis_id"].is_number());
    }

    #[tokio::test]
    async fn test_submit_unknown_dataset_is_404() {
        let harness = TestHarness::new();
        let response = app(&harness)
            .oneshot(post(
                "/audit/full",
                Some(harness.owner.to_string()),
                &json!({"dataset_id": 5, "model_id": 1}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["detail"], "Dataset 5 not found");
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let app = app(&TestHarness::new());
        let response = app.clone().oneshot(get("/audit/full/missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(get("/audit/full/missing/events")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_describe_graphs() {
        let app = app(&TestHarness::new());
        let response = app.clone().oneshot(get("/audit/graph/advanced/describe")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["entry"], "load");
        assert_eq!(body["conditional_edges"][0]["from"], "metrics");

        let response = app.oneshot(get("/audit/graph/nope/describe")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
