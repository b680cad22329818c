//! Ordered accumulation of standard output lines.

use std::sync::{Arc, Mutex, MutexGuard};

use super::StreamTag;
use super::lines::LineListener;

/// Platform line separator used to join collected lines.
#[cfg(windows)]
pub const LINE_SEPARATOR: &str = "\r\n";

/// Platform line separator used to join collected lines.
#[cfg(not(windows))]
pub const LINE_SEPARATOR: &str = "\n";

/// Append-only line store shared between a classifier and its reader.
///
/// Clones observe the same lines. Nothing is dropped, reordered or
/// deduplicated.
#[derive(Debug, Clone, Default)]
pub struct LineCollector {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LineCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, line: impl Into<String>) {
        self.guard().push(line.into());
    }

    /// Snapshot of the collected lines.
    pub fn lines(&self) -> Vec<String> {
        self.guard().clone()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Join the collected lines with [`LINE_SEPARATOR`].
    pub fn join(&self) -> String {
        self.guard().join(LINE_SEPARATOR)
    }
}

impl LineListener for LineCollector {
    fn on_line(&mut self, _tag: StreamTag, line: &str) {
        self.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_join() {
        let collector = LineCollector::new();
        assert!(collector.is_empty());
        assert_eq!(collector.join(), "");
    }

    #[test]
    fn test_keeps_duplicates_in_order() {
        let collector = LineCollector::new();
        let mut listener = collector.clone();
        listener.on_line(StreamTag::StandardOutput, "b");
        listener.on_line(StreamTag::StandardOutput, "a");
        listener.on_line(StreamTag::StandardOutput, "b");

        assert_eq!(collector.lines(), vec!["b", "a", "b"]);
        assert_eq!(
            collector.join(),
            ["b", "a", "b"].join(LINE_SEPARATOR)
        );
    }
}
