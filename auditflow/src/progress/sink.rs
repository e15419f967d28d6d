//! Progress reporter trait and implementations.

use crate::core::{ProgressUpdate, StepStatus};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, Level};

/// Receives progress updates from the executor.
///
/// Implementations must not block and must swallow their own failures;
/// a reporter problem never changes the outcome of a run.
pub trait ProgressReporter: Send + Sync {
    /// Reports one update.
    fn report(&self, update: ProgressUpdate);
}

/// A reporter that discards all updates.
///
/// Used by synchronous runs, where nobody observes progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReporter;

impl ProgressReporter for NoOpReporter {
    fn report(&self, _update: ProgressUpdate) {}
}

/// A reporter that logs updates using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingReporter {
    /// The log level to use.
    level: Level,
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingReporter {
    /// Creates a new logging reporter with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging reporter.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl ProgressReporter for LoggingReporter {
    fn report(&self, update: ProgressUpdate) {
        if self.level == Level::DEBUG {
            debug!(
                step = %update.step,
                status = %update.status,
                progress = update.progress,
                detail = ?update.detail,
                "Progress"
            );
        } else {
            info!(
                step = %update.step,
                status = %update.status,
                progress = update.progress,
                detail = ?update.detail,
                "Progress"
            );
        }
    }
}

/// A collecting reporter for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    updates: RwLock<Vec<ProgressUpdate>>,
}

impl CollectingReporter {
    /// Creates a new collecting reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected updates.
    #[must_use]
    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.read().clone()
    }

    /// Returns the number of collected updates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.updates.read().len()
    }

    /// Returns true if nothing has been reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.read().is_empty()
    }

    /// Returns `(step, status)` pairs in report order.
    #[must_use]
    pub fn trail(&self) -> Vec<(String, StepStatus)> {
        self.updates
            .read()
            .iter()
            .map(|u| (u.step.clone(), u.status))
            .collect()
    }

    /// Returns the updates reported for one step.
    #[must_use]
    pub fn for_step(&self, step: &str) -> Vec<ProgressUpdate> {
        self.updates
            .read()
            .iter()
            .filter(|u| u.step == step)
            .cloned()
            .collect()
    }
}

impl ProgressReporter for CollectingReporter {
    fn report(&self, update: ProgressUpdate) {
        self.updates.write().push(update);
    }
}

/// Forwards updates to an async consumer over an unbounded channel.
///
/// Updates arrive in report order. Once the receiver is dropped further
/// updates are discarded.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ChannelReporter {
    /// Creates a reporter and the receiving end of its channel.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, update: ProgressUpdate) {
        if let Err(err) = self.tx.send(update) {
            debug!(step = %err.0.step, "Progress receiver closed; update dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(step: &str, status: StepStatus) -> ProgressUpdate {
        ProgressUpdate::new(step, status, 0.5)
    }

    #[test]
    fn test_noop_and_logging_reporters() {
        NoOpReporter.report(update("load", StepStatus::Running));
        LoggingReporter::default().report(update("load", StepStatus::Completed));
        LoggingReporter::debug().report(update("load", StepStatus::Completed));
        // Should not panic
    }

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::new();
        assert!(reporter.is_empty());

        reporter.report(update("load", StepStatus::Running));
        reporter.report(update("load", StepStatus::Completed));
        reporter.report(update("xai", StepStatus::Running));

        assert_eq!(reporter.len(), 3);
        assert_eq!(reporter.for_step("load").len(), 2);
        assert_eq!(reporter.trail()[2], ("xai".to_string(), StepStatus::Running));
    }

    #[tokio::test]
    async fn test_channel_reporter_preserves_order() {
        let (reporter, mut rx) = ChannelReporter::channel();
        reporter.report(update("load", StepStatus::Running));
        reporter.report(update("load", StepStatus::Completed));
        drop(reporter);

        assert_eq!(rx.recv().await.unwrap().status, StepStatus::Running);
        assert_eq!(rx.recv().await.unwrap().status, StepStatus::Completed);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_channel_reporter_after_receiver_dropped() {
        let (reporter, rx) = ChannelReporter::channel();
        drop(rx);
        reporter.report(update("load", StepStatus::Running));
    }
}
