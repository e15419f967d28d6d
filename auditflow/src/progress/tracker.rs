//! Completion fractions for a run.

/// Maps "steps finished so far" to a fraction in `[0, 1]` that never decreases.
///
/// The denominator is fixed when the run starts: every declared stage counts,
/// whether it runs, skips, or is routed around, plus any trailing steps the
/// caller performs after the graph (job persistence).
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: usize,
    last: f64,
}

impl ProgressTracker {
    /// Creates a tracker for `total` steps.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self { total, last: 0.0 }
    }

    /// Returns the denominator.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Returns the fraction after `finished` steps, never below the last one returned.
    #[allow(clippy::cast_precision_loss)]
    pub fn at(&mut self, finished: usize) -> f64 {
        let raw = if self.total == 0 {
            1.0
        } else {
            (finished as f64 / self.total as f64).clamp(0.0, 1.0)
        };
        let rounded = (raw * 1000.0).round() / 1000.0;
        let fraction = if raw < 1.0 { rounded.min(0.999) } else { 1.0 };
        self.last = self.last.max(fraction);
        self.last
    }

    /// Returns the last fraction handed out.
    #[must_use]
    pub fn last(&self) -> f64 {
        self.last
    }
}
