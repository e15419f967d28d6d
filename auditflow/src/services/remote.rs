//! An [`AnalysisEngine`] backed by a remote analysis worker over HTTP.

use super::engine::{
    AdvancedMetrics, AnalysisEngine, Diagnosis, EngineJob, Evaluation, Explanation, FairnessParams,
    FairnessReport, RenderedReport, Robustness, Sensitivity,
};
use crate::errors::StageError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Error body returned by the analysis worker.
#[derive(Debug, Deserialize)]
struct WorkerError {
    detail: String,
}

#[derive(Debug, Serialize)]
struct WorkerRequest<'a> {
    #[serde(flatten)]
    job: &'a EngineJob,
    #[serde(skip_serializing_if = "Option::is_none")]
    fairness: Option<&'a FairnessParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<&'a Value>,
}

/// Calls `POST {base_url}/v1/{operation}` on an analysis worker.
///
/// Worker status codes map onto the stage error classes: 404 is
/// `NotFound`, 400 is `InvalidInput`, 422 is `DataContract`. Anything else,
/// including transport and decode failures, is `Upstream`.
#[derive(Debug, Clone)]
pub struct HttpAnalysisEngine {
    base_url: String,
    client: Client,
}

impl HttpAnalysisEngine {
    /// Creates an engine for the worker at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    /// The worker's base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: &WorkerRequest<'_>,
    ) -> Result<T, StageError> {
        let url = format!("{}/v1/{operation}", self.base_url);
        debug!(operation, url = %url, "Calling analysis worker");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| StageError::upstream(format!("Analysis worker unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            let message = serde_json::from_str::<WorkerError>(&body)
                .map(|e| e.detail)
                .unwrap_or(body);
            return Err(classify(status, message));
        }

        response
            .json()
            .await
            .map_err(|e| StageError::upstream(format!("Failed to parse {operation} response: {e}")))
    }

    async fn call_job<T: DeserializeOwned>(&self, operation: &str, job: &EngineJob) -> Result<T, StageError> {
        self.call(
            operation,
            &WorkerRequest {
                job,
                fairness: None,
                results: None,
            },
        )
        .await
    }
}

fn classify(status: StatusCode, message: String) -> StageError {
    match status {
        StatusCode::NOT_FOUND => StageError::not_found(message),
        StatusCode::BAD_REQUEST => StageError::invalid_input(message),
        StatusCode::UNPROCESSABLE_ENTITY => StageError::data_contract(message),
        other => StageError::upstream(format!("Analysis worker returned {}: {message}", other.as_u16())),
    }
}

#[async_trait]
impl AnalysisEngine for HttpAnalysisEngine {
    async fn evaluate(&self, job: &EngineJob) -> Result<Evaluation, StageError> {
        self.call_job("evaluate", job).await
    }

    async fn explain(&self, job: &EngineJob) -> Result<Explanation, StageError> {
        self.call_job("explain", job).await
    }

    async fn sensitivity(&self, job: &EngineJob) -> Result<Sensitivity, StageError> {
        self.call_job("sensitivity", job).await
    }

    async fn robustness(&self, job: &EngineJob) -> Result<Robustness, StageError> {
        self.call_job("robustness", job).await
    }

    async fn fairness(&self, job: &EngineJob, params: &FairnessParams) -> Result<FairnessReport, StageError> {
        self.call(
            "fairness",
            &WorkerRequest {
                job,
                fairness: Some(params),
                results: None,
            },
        )
        .await
    }

    async fn advanced_metrics(&self, job: &EngineJob) -> Result<AdvancedMetrics, StageError> {
        self.call_job("advanced_metrics", job).await
    }

    async fn diagnose(&self, job: &EngineJob, results: &Value) -> Result<Diagnosis, StageError> {
        self.call(
            "diagnose",
            &WorkerRequest {
                job,
                fairness: None,
                results: Some(results),
            },
        )
        .await
    }

    async fn render_report(
        &self,
        job: &EngineJob,
        fairness: Option<&FairnessParams>,
        results: &Value,
    ) -> Result<RenderedReport, StageError> {
        self.call(
            "report",
            &WorkerRequest {
                job,
                fairness,
                results: Some(results),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorClass;

    #[test]
    fn test_status_classification() {
        let cases = [
            (StatusCode::NOT_FOUND, ErrorClass::NotFound),
            (StatusCode::BAD_REQUEST, ErrorClass::InvalidInput),
            (StatusCode::UNPROCESSABLE_ENTITY, ErrorClass::DataContract),
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorClass::Upstream),
            (StatusCode::BAD_GATEWAY, ErrorClass::Upstream),
        ];
        for (status, class) in cases {
            assert_eq!(classify(status, "x".to_string()).class, class, "{status}");
        }
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let engine = HttpAnalysisEngine::new("http://worker:9000/", Duration::from_secs(1)).unwrap();
        assert_eq!(engine.base_url(), "http://worker:9000");
    }

    #[tokio::test]
    async fn test_unreachable_worker_is_upstream() {
        let engine = HttpAnalysisEngine::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let job: EngineJob = serde_json::from_value(serde_json::json!({
            "dataset": {"id": 1, "owner_id": uuid::Uuid::nil(), "name": "d", "path": "/d.csv", "target_column": "y"},
            "model": {"id": 1, "owner_id": uuid::Uuid::nil(), "name": "m", "framework": "sklearn", "path": "/m"}
        }))
        .unwrap();

        let err = engine.evaluate(&job).await.unwrap_err();
        assert_eq!(err.class, ErrorClass::Upstream);
    }
}
