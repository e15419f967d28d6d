//! Service configuration.

use crate::jobs::JobSettings;
use crate::observability::LogFormat;
use crate::pipeline::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of range.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// Offending setting.
        key: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// The settings file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is malformed.
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Connection settings for the insight LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmSettings {
    /// OpenAI-compatible API base. Insights are disabled when unset.
    #[serde(default)]
    pub api_base: Option<String>,
    /// Bearer token.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Model identifier.
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Request timeout in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_base: None,
            api_key: None,
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmSettings {
    /// Returns true if an endpoint is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.api_base.as_deref().is_some_and(|base| !base.trim().is_empty())
    }
}

/// Settings for the audit service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Interval between status checks on an event stream, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pipelines allowed to execute at once.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Maximum length of a recorded job error.
    #[serde(default = "default_error_message_limit")]
    pub error_message_limit: usize,
    /// Base URL of the analysis worker.
    #[serde(default = "default_analysis_service_url")]
    pub analysis_service_url: String,
    /// Analysis worker request timeout in seconds.
    #[serde(default = "default_analysis_timeout")]
    pub analysis_timeout_secs: u64,
    /// Insight LLM.
    #[serde(default)]
    pub llm: LlmSettings,
    /// JSON catalog seeding the in-memory repository.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Whether the advanced graph runs advanced metrics without being asked.
    #[serde(default = "default_run_advanced")]
    pub run_advanced_by_default: bool,
    /// Retry policy for persisting finished audits and terminal job states.
    #[serde(default)]
    pub persistence_retry: RetryConfig,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_error_message_limit() -> usize {
    200
}

fn default_analysis_service_url() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_analysis_timeout() -> u64 {
    300
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_run_advanced() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            error_message_limit: default_error_message_limit(),
            analysis_service_url: default_analysis_service_url(),
            analysis_timeout_secs: default_analysis_timeout(),
            llm: LlmSettings::default(),
            catalog_path: None,
            log_format: LogFormat::default(),
            log_filter: default_log_filter(),
            run_advanced_by_default: default_run_advanced(),
            persistence_retry: RetryConfig::default(),
        }
    }
}

impl Settings {
    /// Creates settings with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads settings from a JSON file; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Sets the bind address.
    #[must_use]
    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Sets the stream poll interval.
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_max_concurrent_jobs(mut self, jobs: usize) -> Self {
        self.max_concurrent_jobs = jobs;
        self
    }

    /// Sets the error message bound.
    #[must_use]
    pub fn with_error_message_limit(mut self, limit: usize) -> Self {
        self.error_message_limit = limit;
        self
    }

    /// Sets the analysis worker URL.
    #[must_use]
    pub fn with_analysis_service_url(mut self, url: impl Into<String>) -> Self {
        self.analysis_service_url = url.into();
        self
    }

    /// Sets the LLM settings.
    #[must_use]
    pub fn with_llm(mut self, llm: LlmSettings) -> Self {
        self.llm = llm;
        self
    }

    /// Sets the catalog path.
    #[must_use]
    pub fn with_catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    /// Sets the log format.
    #[must_use]
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Sets whether advanced metrics run by default.
    #[must_use]
    pub fn with_run_advanced_by_default(mut self, value: bool) -> Self {
        self.run_advanced_by_default = value;
        self
    }

    /// Sets the persistence retry policy.
    #[must_use]
    pub fn with_persistence_retry(mut self, retry: RetryConfig) -> Self {
        self.persistence_retry = retry;
        self
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrent_jobs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.error_message_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "error_message_limit",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.persistence_retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "persistence_retry.max_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Analysis worker timeout.
    #[must_use]
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    /// The subset of settings the job manager uses.
    #[must_use]
    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_concurrent_jobs: self.max_concurrent_jobs,
            error_message_limit: self.error_message_limit,
            persistence_retry: self.persistence_retry.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.poll_interval_ms, 1000);
        assert_eq!(settings.error_message_limit, 200);
        assert!(settings.run_advanced_by_default);
        assert!(!settings.llm.is_enabled());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"max_concurrent_jobs": 8, "llm": {{"api_base": "http://llm:4000"}}, "log_format": "json"}}"#
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.max_concurrent_jobs, 8);
        assert_eq!(settings.bind_addr, "0.0.0.0:8000");
        assert_eq!(settings.llm.model, "gpt-4o-mini");
        assert!(settings.llm.is_enabled());
        assert_eq!(settings.log_format, LogFormat::Json);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let err = Settings::new().with_max_concurrent_jobs(0).validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrent_jobs"));
    }

    #[test]
    fn test_job_settings_projection() {
        let job = Settings::new()
            .with_poll_interval_ms(250)
            .with_error_message_limit(80)
            .job_settings();
        assert_eq!(job.poll_interval, Duration::from_millis(250));
        assert_eq!(job.error_message_limit, 80);
        assert_eq!(job.max_concurrent_jobs, 4);
    }
}
