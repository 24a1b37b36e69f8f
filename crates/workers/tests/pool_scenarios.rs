//! End-to-end scenarios across pool, dispatch, streams and lifecycle
//!
//! Uses only the public API with a small uppercasing module.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cladeworks_workers::prelude::*;
use cladeworks_workers::{notify_fn, LifecyclePhase};
use futures::StreamExt;
use parking_lot::Mutex;

struct Upper;

impl ComputationModule for Upper {
    fn initialize(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }

    fn call(&mut self, function: &str, args: Payload) -> Result<Payload, ModuleError> {
        match function {
            "upper" => Ok(Payload::text(args.as_text().unwrap_or_default().to_uppercase())),
            other => Err(ModuleError::unknown_function(other)),
        }
    }

    fn stream(
        &mut self,
        function: &str,
        args: Payload,
        callbacks: &StreamCallbacks,
    ) -> Result<(), ModuleError> {
        match function {
            "letters" => {
                for c in args.as_text().unwrap_or_default().chars() {
                    if !callbacks.on_item(c.to_string()) {
                        return Ok(());
                    }
                }
                callbacks.on_complete();
                Ok(())
            }
            other => Err(ModuleError::unknown_function(other)),
        }
    }
}

struct UpperEntry;

impl ModuleEntry for UpperEntry {
    fn name(&self) -> &str {
        "upper"
    }

    fn load(&self) -> Result<Box<dyn ComputationModule>, ModuleError> {
        Ok(Box::new(Upper))
    }
}

fn entry() -> Arc<dyn ModuleEntry> {
    Arc::new(UpperEntry)
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_pool_results_reach_application_state() {
    let pool = WorkerPool::create(entry(), PoolConfig::new("scenario").with_size(3))
        .await
        .unwrap();

    let store: Arc<Mutex<HashMap<TaskId, Payload>>> = Arc::default();
    let dispatcher = wire(
        &pool,
        Arc::new(notify_fn({
            let store = Arc::clone(&store);
            move |notification: TaskCompletedNotification| {
                let store = Arc::clone(&store);
                async move {
                    store.lock().insert(notification.task_id, notification.result);
                }
            }
        })),
    );

    let words = ["alpha", "beta", "gamma", "delta", "epsilon"];
    let handles: Vec<_> = words
        .iter()
        .map(|word| pool.queue(Task::new("upper", *word)).unwrap())
        .collect();
    let ids: Vec<_> = handles.iter().map(TaskHandle::id).collect();

    for (handle, word) in handles.into_iter().zip(words) {
        assert_eq!(handle.await, Ok(Payload::text(word.to_uppercase())));
    }

    pool.terminate().await;
    let stats = dispatcher.join().await;
    assert_eq!(stats.completed, words.len());

    let store = store.lock();
    for (id, word) in ids.iter().zip(words) {
        assert_eq!(store.get(id), Some(&Payload::text(word.to_uppercase())));
    }
}

#[tokio::test]
async fn test_unknown_function_fails_only_its_task() {
    let pool = WorkerPool::create(entry(), PoolConfig::new("scenario").with_size(1))
        .await
        .unwrap();

    let bad = pool.queue(Task::new("lower", "X")).unwrap();
    let good = pool.queue(Task::new("upper", "x")).unwrap();

    match bad.await {
        Err(TaskError::Call(CallError::ModuleThrew(err))) => {
            assert_eq!(err.kind.as_deref(), Some("unknown_function"));
        }
        other => panic!("expected module error, got {other:?}"),
    }
    assert_eq!(good.await, Ok(Payload::text("X")));
    pool.terminate().await;
}

/// One-shot worker: spawn, init, stream once, terminate
struct LetterRun {
    word: &'static str,
}

#[async_trait]
impl Lifecycle for LetterRun {
    type Handle = WorkerEndpoint;
    type Output = Vec<Payload>;
    type Error = StreamError;

    async fn start(&self) -> Result<WorkerEndpoint, StreamError> {
        let endpoint = WorkerEndpoint::spawn(entry(), SpawnOptions::new("oneshot", WorkerId(0)))
            .await
            .map_err(|_| StreamError::WorkerLost)?;
        endpoint.init().await.map_err(|_| StreamError::WorkerLost)?;
        Ok(endpoint)
    }

    async fn run(&self, endpoint: &WorkerEndpoint) -> Result<Vec<Payload>, StreamError> {
        let stream = endpoint
            .stream("letters", Payload::text(self.word))
            .map_err(|_| StreamError::WorkerLost)?;
        stream.collect_items().await
    }

    async fn stop(&self, endpoint: Arc<WorkerEndpoint>) -> Result<(), StreamError> {
        endpoint.terminate().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_managed_one_shot_stream() {
    let lifecycle = ManagedLifecycle::new("letters", LetterRun { word: "abc" });

    let items = lifecycle.start().await.unwrap().unwrap();
    assert_eq!(
        items,
        vec![Payload::text("a"), Payload::text("b"), Payload::text("c")]
    );
    assert_eq!(lifecycle.phase(), LifecyclePhase::Idle);

    // Reusable after a full cycle
    assert!(lifecycle.start().await.unwrap().is_ok());
}

#[tokio::test]
async fn test_stream_cancelled_by_consumer() {
    let endpoint = WorkerEndpoint::spawn(entry(), SpawnOptions::new("scenario", WorkerId(0)))
        .await
        .unwrap();
    endpoint.init().await.unwrap();

    let mut stream = endpoint
        .stream("letters", Payload::text("x".repeat(10_000)))
        .unwrap();
    assert_eq!(stream.next().await, Some(Ok(Payload::text("x"))));
    stream.cancel();
    assert_eq!(stream.next().await, None);

    // The worker stays usable after a cancelled stream
    let result = tokio::time::timeout(Duration::from_secs(5), endpoint.call("upper", "ok".into()))
        .await
        .unwrap();
    assert_eq!(result, Ok(Payload::text("OK")));
    endpoint.terminate().await;
}
