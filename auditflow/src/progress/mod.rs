//! Progress reporting.
//!
//! The executor reports each step through a [`ProgressReporter`]; reporting is
//! fire-and-forget and never fails the run. [`ProgressTracker`] turns step
//! positions into monotonic completion fractions.

mod sink;
mod tracker;

pub use sink::{
    ChannelReporter, CollectingReporter, LoggingReporter, NoOpReporter, ProgressReporter,
};
pub use tracker::ProgressTracker;
