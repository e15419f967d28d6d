//! Mapping of crate errors onto HTTP responses, and caller identity.

use crate::errors::AuditflowError;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

/// Header carrying the authenticated caller, set by the upstream auth layer.
pub const OWNER_HEADER: &str = "x-owner-id";

/// An error rendered as `{"detail": message}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// Response status.
    pub status: StatusCode,
    /// Message placed in `detail`.
    pub detail: String,
}

impl ApiError {
    /// Creates an error with an explicit status.
    #[must_use]
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    /// 404 with `detail`.
    #[must_use]
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    /// 401 with `detail`.
    #[must_use]
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, detail)
    }
}

impl From<AuditflowError> for ApiError {
    fn from(err: AuditflowError) -> Self {
        if err.is_not_found() {
            let detail = match &err {
                AuditflowError::StageFailed(failure) => failure.source.message.clone(),
                AuditflowError::JobNotFound(_) => "Job not found".to_string(),
                other => other.to_string(),
            };
            return Self::not_found(detail);
        }
        error!(error = %err, error_type = %err.error_type(), "Request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// The caller's user id, read from [`OWNER_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(OWNER_HEADER)
            .ok_or_else(|| ApiError::unauthorized("Not authenticated"))?;
        raw.to_str()
            .ok()
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .map(Self)
            .ok_or_else(|| ApiError::unauthorized("Invalid caller identity"))
    }
}
