//! Channel layer: output framing, aggregation and the input path.
//!
//! Raw bytes from a remote channel flow into a [`LineClassifier`], which
//! frames them into lines and fans each line out to its listeners
//! (loggers, a [`LineCollector`], the interaction engine). Responses travel
//! back to the remote process through an [`InputSink`].

mod collector;
mod lines;
mod sink;

pub use collector::{LINE_SEPARATOR, LineCollector};
pub use lines::{LineClassifier, LineListener, LogListener};
pub use sink::{DiscardSink, InputSink, OutputSink};

use std::fmt;

/// Logical output stream a line was emitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamTag {
    /// The remote process's standard output.
    StandardOutput,
    /// The remote process's standard error.
    StandardError,
}

impl fmt::Display for StreamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamTag::StandardOutput => write!(f, "stdout"),
            StreamTag::StandardError => write!(f, "stderr"),
        }
    }
}
