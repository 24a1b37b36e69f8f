// Task Dispatch Facade
//
// Wires pool events into application state. The only stable boundary between
// the orchestration layer and its consumers is the TASK_COMPLETED
// notification: {"type": "TASK_COMPLETED", "taskId": ..., "result": ...}.
// Failed tasks are not retried here; retry belongs at the queue() call site.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TaskError;
use crate::module::Payload;
use crate::pool::{TaskId, WorkerEvent, WorkerPool};

// ============================================================================
// Notifications
// ============================================================================

/// Notification delivered for every completed task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "TASK_COMPLETED", rename_all = "camelCase")]
pub struct TaskCompletedNotification {
    pub task_id: TaskId,
    pub result: Payload,
}

// ============================================================================
// TaskNotifier Trait
// ============================================================================

/// Receiver of task notifications
///
/// Notifiers run on the dispatcher task, one notification at a time, in event
/// order. They should be fast; spawn for heavy work.
///
/// # Example
///
/// ```ignore
/// struct Store(Mutex<HashMap<TaskId, Payload>>);
///
/// #[async_trait]
/// impl TaskNotifier for Store {
///     async fn task_completed(&self, notification: TaskCompletedNotification) {
///         self.0.lock().insert(notification.task_id, notification.result);
///     }
/// }
/// ```
#[async_trait]
pub trait TaskNotifier: Send + Sync {
    /// Called once per `TaskCompleted` event
    async fn task_completed(&self, notification: TaskCompletedNotification);

    /// Called once per `TaskFailed` event
    async fn task_failed(&self, _task_id: TaskId, _error: &TaskError) {}

    /// Human-readable name for logging
    fn name(&self) -> &'static str {
        "TaskNotifier"
    }
}

/// Notifier backed by a closure
pub struct FnNotifier<F> {
    f: F,
}

/// Build a notifier from an async closure
pub fn notify_fn<F, Fut>(f: F) -> FnNotifier<F>
where
    F: Fn(TaskCompletedNotification) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    FnNotifier { f }
}

#[async_trait]
impl<F, Fut> TaskNotifier for FnNotifier<F>
where
    F: Fn(TaskCompletedNotification) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn task_completed(&self, notification: TaskCompletedNotification) {
        (self.f)(notification).await;
    }

    fn name(&self) -> &'static str {
        "FnNotifier"
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Counters reported when the dispatcher ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub completed: usize,
    pub failed: usize,
    /// Events dropped because the dispatcher lagged behind the pool
    pub missed: u64,
}

/// Running dispatcher
pub struct DispatchHandle {
    task: JoinHandle<DispatchStats>,
    cancel: CancellationToken,
}

impl DispatchHandle {
    /// Stop dispatching; idempotent
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the dispatcher to end (pool terminated or `stop` called)
    pub async fn join(self) -> DispatchStats {
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Dispatcher task failed");
                DispatchStats::default()
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Forward pool events to `notifier`
///
/// Subscribes before returning, so every task completed after this call is
/// delivered. Ends by itself when the pool terminates.
pub fn wire(pool: &WorkerPool, notifier: Arc<dyn TaskNotifier>) -> DispatchHandle {
    let mut events = pool.events();
    let cancel = CancellationToken::new();
    let pool_name = pool.name().to_string();

    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let mut stats = DispatchStats::default();
            info!(pool = %pool_name, notifier = notifier.name(), "Dispatcher started");

            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };

                match event {
                    Ok(WorkerEvent::TaskCompleted {
                        task_id, result, ..
                    }) => {
                        debug!(pool = %pool_name, %task_id, "Dispatching task completion");
                        notifier
                            .task_completed(TaskCompletedNotification { task_id, result })
                            .await;
                        stats.completed += 1;
                    }
                    Ok(WorkerEvent::TaskFailed { task_id, error, .. }) => {
                        notifier.task_failed(task_id, &error).await;
                        stats.failed += 1;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(pool = %pool_name, missed, "Dispatcher lagged, events were dropped");
                        stats.missed += missed;
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            info!(
                pool = %pool_name,
                completed = stats.completed,
                failed = stats.failed,
                "Dispatcher stopped"
            );
            stats
        }
    });

    DispatchHandle { task, cancel }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::Task;
    use crate::test_support::EchoEntry;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Recording {
        completed: Mutex<HashMap<TaskId, Payload>>,
        failed: Mutex<Vec<TaskId>>,
    }

    #[async_trait]
    impl TaskNotifier for Recording {
        async fn task_completed(&self, notification: TaskCompletedNotification) {
            self.completed
                .lock()
                .insert(notification.task_id, notification.result);
        }

        async fn task_failed(&self, task_id: TaskId, _error: &TaskError) {
            self.failed.lock().push(task_id);
        }
    }

    #[test]
    fn test_notification_wire_shape() {
        let task_id = TaskId::new();
        let json = serde_json::to_value(TaskCompletedNotification {
            task_id,
            result: Payload::text("ok"),
        })
        .unwrap();

        assert_eq!(json["type"], "TASK_COMPLETED");
        assert_eq!(json["taskId"], task_id.to_string());
        assert_eq!(json["result"]["kind"], "text");
    }

    #[tokio::test]
    async fn test_wire_notifies_every_completion() {
        let config = PoolConfig::new("test").with_size(2);
        let pool = WorkerPool::create(EchoEntry::new().shared(), config)
            .await
            .unwrap();
        let recording = Arc::new(Recording::default());
        let dispatcher = wire(&pool, recording.clone());

        let ok = pool.queue(Task::new("echo", "a")).unwrap();
        let ok_id = ok.id();
        let bad = pool.queue(Task::new("fail", Payload::Empty)).unwrap();
        let bad_id = bad.id();
        ok.await.unwrap();
        bad.await.unwrap_err();

        pool.terminate().await;
        let stats = dispatcher.join().await;

        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(
            recording.completed.lock().get(&ok_id),
            Some(&Payload::text("a"))
        );
        assert_eq!(*recording.failed.lock(), vec![bad_id]);
    }

    #[tokio::test]
    async fn test_closure_notifier_and_stop() {
        let config = PoolConfig::new("test").with_size(1);
        let pool = WorkerPool::create(EchoEntry::new().shared(), config)
            .await
            .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = wire(
            &pool,
            Arc::new(notify_fn({
                let seen = Arc::clone(&seen);
                move |notification: TaskCompletedNotification| {
                    let seen = Arc::clone(&seen);
                    async move { seen.lock().push(notification.result) }
                }
            })),
        );

        pool.queue(Task::new("echo", "x")).unwrap().await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while seen.lock().is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        dispatcher.stop();
        dispatcher.stop();
        let stats = dispatcher.join().await;
        assert_eq!(stats.completed, 1);
        assert_eq!(*seen.lock(), vec![Payload::text("x")]);

        pool.terminate().await;
    }
}
