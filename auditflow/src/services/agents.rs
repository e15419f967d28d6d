//! LLM-backed insight agents.
//!
//! Insights are advisory: a failing agent never fails an audit.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::{self, Debug};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Which specialist is being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Performance metrics reviewer.
    Metrics,
    /// Explainability reviewer.
    Xai,
    /// Fairness reviewer.
    Fairness,
}

impl AgentKind {
    /// Key under which this agent's insight is stored.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::Xai => "xai",
            Self::Fairness => "fairness",
        }
    }

    /// System prompt for this specialist.
    #[must_use]
    pub fn system_prompt(self) -> &'static str {
        match self {
            Self::Metrics => {
                "You are an expert ML evaluation agent specializing in model performance analysis. \
                 Analyze performance metrics, identify potential issues such as overfitting, \
                 underfitting, class imbalance or data leakage, assess metric quality relative to \
                 the problem type, and flag metrics that require deeper investigation."
            }
            Self::Xai => {
                "You are an expert ML explainability agent. Analyze feature importance \
                 (SHAP, permutation importance), identify spurious correlations and feature \
                 dependencies, and recommend improvements for model transparency."
            }
            Self::Fairness => {
                "You are an expert ML fairness agent. Analyze demographic parity, equalized odds \
                 and disparate impact across protected groups, assess them against the 80% rule, \
                 and recommend bias mitigation strategies."
            }
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured answer from an insight agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Concise summary.
    pub summary: String,
    /// Confidence in the assessment, 0.0 to 1.0.
    pub confidence: f64,
    /// Key findings.
    pub findings: Vec<String>,
    /// Recommended actions.
    pub recommendations: Vec<String>,
    /// Whether the agent asks for deeper analysis.
    #[serde(default)]
    pub requires_further_analysis: bool,
}

impl AgentResponse {
    /// The insight entry stored in the context; omits the routing hint.
    #[must_use]
    pub fn to_insight(&self) -> Value {
        json!({
            "summary": self.summary,
            "confidence": self.confidence,
            "findings": self.findings,
            "recommendations": self.recommendations,
        })
    }
}

/// Errors from an insight agent.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// No LLM endpoint is configured.
    #[error("LLM not configured")]
    NotConfigured,

    /// The request did not reach the endpoint.
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// The endpoint answered with an error status.
    #[error("API error ({code}): {message}")]
    ApiError {
        /// HTTP status code.
        code: u16,
        /// Response body.
        message: String,
    },

    /// The answer could not be parsed.
    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),
}

/// Produces a narrative insight for a stage's results.
#[async_trait]
pub trait InsightAgent: Send + Sync + Debug {
    /// Analyzes `payload` as the given specialist.
    async fn analyze(&self, kind: AgentKind, payload: Value) -> Result<AgentResponse, AgentError>;
}

/// An agent that is never available.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledInsightAgent;

#[async_trait]
impl InsightAgent for DisabledInsightAgent {
    async fn analyze(&self, _kind: AgentKind, _payload: Value) -> Result<AgentResponse, AgentError> {
        Err(AgentError::NotConfigured)
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
    response_format: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    content: Option<String>,
}

const FORMAT_INSTRUCTIONS: &str = "Respond with a single JSON object with the keys \
    \"summary\" (string), \"confidence\" (number between 0.0 and 1.0), \"findings\" \
    (array of strings), \"recommendations\" (array of strings) and \
    \"requires_further_analysis\" (boolean).";

/// An agent backed by an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct LlmInsightAgent {
    api_base: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl Debug for LlmInsightAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmInsightAgent")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl LlmInsightAgent {
    /// Creates an agent for `api_base` using `model`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::RequestFailed(e.to_string()))?;
        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            client,
        })
    }

    /// Model identifier sent with every request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn user_prompt(kind: AgentKind, payload: &Value) -> String {
        let body = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
        format!("Analyze the following {kind} results:\n\n{body}\n\n{FORMAT_INSTRUCTIONS}")
    }
}

/// Parses the agent's JSON answer, tolerating a fenced code block.
pub(crate) fn parse_response(content: &str) -> Result<AgentResponse, AgentError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body).map_err(|e| AgentError::ParseError(e.to_string()))
}

#[async_trait]
impl InsightAgent for LlmInsightAgent {
    async fn analyze(&self, kind: AgentKind, payload: Value) -> Result<AgentResponse, AgentError> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: kind.system_prompt().to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: Self::user_prompt(kind, &payload),
                },
            ],
            temperature: 0.1,
            response_format: json!({"type": "json_object"}),
        };

        let mut http_request = self.client.post(&url).header("Content-Type", "application/json");
        if let Some(ref api_key) = self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {api_key}"));
        }

        debug!(agent = %kind, model = %self.model, "Requesting insight");
        let response = http_request
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(AgentError::ApiError {
                code: status.as_u16(),
                message,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::ParseError(format!("Failed to parse API response: {e}")))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AgentError::ParseError("No content in LLM response".to_string()))?;

        parse_response(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_agent_always_fails() {
        let err = DisabledInsightAgent
            .analyze(AgentKind::Metrics, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "LLM not configured");
    }

    #[test]
    fn test_parse_plain_and_fenced_json() {
        let plain = r#"{"summary": "fine", "confidence": 0.8, "findings": [], "recommendations": ["more data"]}"#;
        let response = parse_response(plain).unwrap();
        assert_eq!(response.summary, "fine");
        assert!(!response.requires_further_analysis);

        let fenced = format!("```json\n{plain}\n```");
        assert_eq!(parse_response(&fenced).unwrap(), response);
    }

    #[test]
    fn test_parse_garbage_is_parse_error() {
        assert!(matches!(parse_response("not json"), Err(AgentError::ParseError(_))));
    }

    #[test]
    fn test_insight_omits_routing_hint() {
        let response = AgentResponse {
            summary: "s".to_string(),
            confidence: 0.5,
            findings: vec!["f".to_string()],
            recommendations: vec![],
            requires_further_analysis: true,
        };
        let insight = response.to_insight();
        assert_eq!(insight["findings"], json!(["f"]));
        assert!(insight.get("requires_further_analysis").is_none());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let agent = LlmInsightAgent::new(
            "http://llm/",
            Some("secret".to_string()),
            "gpt-4o-mini",
            Duration::from_secs(1),
        )
        .unwrap();
        let rendered = format!("{agent:?}");
        assert!(!rendered.contains("secret"));
        assert_eq!(agent.model(), "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_failure() {
        let agent = LlmInsightAgent::new("http://127.0.0.1:9", None, "m", Duration::from_millis(500)).unwrap();
        let err = agent.analyze(AgentKind::Xai, json!({"xai": {}})).await.unwrap_err();
        assert!(matches!(err, AgentError::RequestFailed(_)));
    }
}
