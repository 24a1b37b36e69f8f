//! Run progress fed by pool notifications

use async_trait::async_trait;
use cladeworks_workers::{TaskCompletedNotification, TaskError, TaskId, TaskNotifier};
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

/// Progress counters of one analysis run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Records handed to the pool
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
}

impl Progress {
    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }

    pub fn pending(&self) -> usize {
        self.submitted.saturating_sub(self.finished())
    }
}

/// [`TaskNotifier`] that counts completions and publishes them on a watch channel
#[derive(Debug)]
pub struct ProgressNotifier {
    tx: watch::Sender<Progress>,
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressNotifier {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Progress::default());
        Self { tx }
    }

    /// Zero the counters for a new run
    pub fn reset(&self) {
        self.tx.send_replace(Progress::default());
    }

    pub fn record_submitted(&self) {
        self.tx.send_modify(|p| p.submitted += 1);
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Progress {
        *self.tx.borrow()
    }
}

#[async_trait]
impl TaskNotifier for ProgressNotifier {
    async fn task_completed(&self, notification: TaskCompletedNotification) {
        debug!(task_id = %notification.task_id, "Analysis completed");
        self.tx.send_modify(|p| p.completed += 1);
    }

    async fn task_failed(&self, task_id: TaskId, error: &TaskError) {
        debug!(%task_id, %error, "Analysis failed");
        self.tx.send_modify(|p| p.failed += 1);
    }

    fn name(&self) -> &'static str {
        "ProgressNotifier"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cladeworks_workers::{CallError, Payload};

    #[tokio::test]
    async fn test_progress_counts() {
        let notifier = ProgressNotifier::new();
        let mut rx = notifier.subscribe();

        notifier.record_submitted();
        notifier.record_submitted();
        notifier
            .task_completed(TaskCompletedNotification {
                task_id: TaskId::new(),
                result: Payload::Empty,
            })
            .await;
        notifier
            .task_failed(TaskId::new(), &TaskError::Call(CallError::WorkerLost))
            .await;

        assert!(rx.has_changed().unwrap());
        let progress = *rx.borrow_and_update();
        assert_eq!(progress.submitted, 2);
        assert_eq!(progress.finished(), 2);
        assert_eq!(progress.pending(), 0);
        assert_eq!(notifier.snapshot(), progress);
    }
}
