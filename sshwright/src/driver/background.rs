//! Tracking of background executions and their failures.

use std::mem;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::{Error, ExecutionError, Result};

/// Counts in-flight background executions and keeps their failures until
/// someone asks for them.
///
/// A background command's caller has already returned when the command
/// fails, so failures are parked here and surfaced by
/// [`wait`](Self::wait).
#[derive(Debug, Clone)]
pub struct BackgroundMonitor {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    running: watch::Sender<usize>,
    failures: Mutex<Vec<Error>>,
}

impl Default for BackgroundMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundMonitor {
    pub fn new() -> Self {
        let (running, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                running,
                failures: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn begin(&self) {
        self.inner.running.send_modify(|n| *n += 1);
    }

    pub(crate) fn finish(&self, outcome: Result<()>) {
        if let Err(e) = outcome {
            self.inner
                .failures
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(e);
        }
        self.inner.running.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Background executions that have not completed yet.
    pub fn running(&self) -> usize {
        *self.inner.running.borrow()
    }

    /// Failures collected and not yet returned by `wait`.
    pub fn failure_count(&self) -> usize {
        self.inner
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Wait until no background execution is running, then return every
    /// failure collected since the previous call.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.inner.running.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;

        let failures = mem::take(
            &mut *self
                .inner
                .failures
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExecutionError::BackgroundFailures(failures).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    #[test]
    fn test_wait_returns_immediately_when_idle() {
        let monitor = BackgroundMonitor::new();
        assert_eq!(monitor.running(), 0);
        assert_ready!(task::spawn(monitor.wait()).poll()).unwrap();
    }

    #[test]
    fn test_wait_pending_while_running() {
        let monitor = BackgroundMonitor::new();
        monitor.begin();

        let mut wait = task::spawn(monitor.wait());
        assert_pending!(wait.poll());

        monitor.finish(Ok(()));
        assert!(wait.is_woken());
        assert_ready!(wait.poll()).unwrap();
    }

    #[tokio::test]
    async fn test_wait_blocks_until_finished_and_drains_failures() {
        let monitor = BackgroundMonitor::new();
        monitor.begin();
        monitor.begin();
        assert_eq!(monitor.running(), 2);

        let worker = monitor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            worker.finish(Ok(()));
            worker.finish(Err(ExecutionError::command(3).into()));
        });

        let err = monitor.wait().await.unwrap_err();
        match err {
            Error::Execution(ExecutionError::BackgroundFailures(failures)) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].exit_status(), Some(3));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(monitor.failure_count(), 0);
        monitor.wait().await.unwrap();
    }
}
