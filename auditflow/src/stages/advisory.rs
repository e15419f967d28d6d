//! Best-effort sub-steps inside a stage.

use crate::core::FailureRecord;
use std::fmt::Display;
use std::future::Future;
use tracing::warn;

/// Runs a sub-step whose failure must not fail the enclosing stage.
///
/// On error the failure is logged at `warn` and returned as a
/// [`FailureRecord`] named `stage.step`; the caller records it on its patch
/// and leaves the sub-step's output key absent.
pub async fn best_effort<T, E, Fut>(stage: &str, step: &str, fut: Fut) -> Result<T, FailureRecord>
where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    match fut.await {
        Ok(value) => Ok(value),
        Err(err) => {
            warn!(stage, step, error = %err, "Advisory step failed; continuing");
            Err(FailureRecord::new(format!("{stage}.{step}"), err.to_string())
                .with_error_type("AdvisoryFailure"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_best_effort_passes_success_through() {
        let value = best_effort("metrics", "insight", async { Ok::<_, String>(7) }).await;
        assert_eq!(value.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_best_effort_records_failure() {
        let record = best_effort("metrics", "insight", async {
            Err::<(), _>("LLM not configured".to_string())
        })
        .await
        .unwrap_err();

        assert_eq!(record.stage, "metrics.insight");
        assert_eq!(record.error, "LLM not configured");
        assert_eq!(record.error_type, "AdvisoryFailure");
    }
}
