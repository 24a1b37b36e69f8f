//! Worker pool for request/response tasks
//!
//! Owns a fixed set of initialized workers and load-balances queued tasks
//! across them. All bookkeeping happens under one lock, and commands are
//! enqueued on a worker's channel while that lock is held, so tasks assigned
//! to the same worker run in submission order and events for one task are
//! emitted in causal order.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use super::admission::{has_queue_room, least_busy, LoadTracker, PoolStats};
use super::events::{WorkerEvent, EVENT_CHANNEL_CAPACITY};
use super::task::{Task, TaskHandle, TaskId};
use crate::config::PoolConfig;
use crate::error::{CallError, PoolError, StartError, TaskError};
use crate::module::{ModuleEntry, Payload};
use crate::worker::{await_reply, SpawnOptions, WorkerEndpoint, WorkerId, WorkerState};

/// Pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    /// Accepting tasks
    Running,
    /// `terminate` in progress; new tasks are rejected
    Terminating,
    /// All workers joined, event channel closed
    Terminated,
}

/// Fixed-size pool of initialized workers
///
/// Cheap to clone; clones share the same workers.
///
/// # Termination policy
///
/// `terminate` rejects new tasks, aborts tasks still waiting for a worker
/// ([`TaskError::Aborted`]), lets tasks already handed to a worker run to
/// completion, joins every worker thread and closes the event channel.
///
/// # Example
///
/// ```ignore
/// let pool = WorkerPool::create(entry, PoolConfig::new("analysis").with_size(2)).await?;
/// let mut events = pool.events();
///
/// let handle = pool.queue(Task::new("runAnalysis", Payload::text(record)))?;
/// let result = handle.await?;
///
/// pool.terminate().await;
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    entry: Arc<dyn ModuleEntry>,
    runtime: Handle,
    state: Mutex<PoolState>,
    events: RwLock<Option<broadcast::Sender<WorkerEvent>>>,
    load: LoadTracker,
    tracker: TaskTracker,
    next_worker_id: AtomicUsize,
    closed: CancellationToken,
}

struct PoolState {
    status: PoolStatus,
    workers: Vec<PoolWorker>,
    waiting: VecDeque<PendingTask>,
    respawning: bool,
}

struct PoolWorker {
    endpoint: Arc<WorkerEndpoint>,
    in_flight: usize,
}

struct PendingTask {
    id: TaskId,
    task: Task,
    reply: oneshot::Sender<Result<Payload, TaskError>>,
}

impl WorkerPool {
    /// Spawn and initialize `config.size` workers concurrently
    ///
    /// If any worker fails to spawn or initialize, the workers already started
    /// are terminated and [`PoolError::InitFailure`] is returned.
    #[instrument(skip(entry, config), fields(pool = %config.name, size = config.size))]
    pub async fn create(
        entry: Arc<dyn ModuleEntry>,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        info!(
            pool = %config.name,
            module = %entry.name(),
            size = config.size,
            concurrency_per_worker = config.concurrency_per_worker,
            max_queued_jobs = ?config.max_queued_jobs,
            "Starting worker pool"
        );

        let started = join_all(
            (0..config.size).map(|n| start_worker(Arc::clone(&entry), &config, WorkerId(n))),
        )
        .await;

        let mut workers = Vec::with_capacity(config.size);
        let mut failure = None;
        for result in started {
            match result {
                Ok(endpoint) => workers.push(endpoint),
                Err(err) if failure.is_none() => failure = Some(err),
                Err(err) => {
                    warn!(
                        pool = %config.name,
                        error = %err,
                        "Additional worker failed to start"
                    );
                }
            }
        }

        if let Some(source) = failure {
            error!(
                pool = %config.name,
                error = %source,
                "Pool initialization failed, tearing down started workers"
            );
            join_all(workers.iter().map(|endpoint| endpoint.terminate())).await;
            return Err(PoolError::InitFailure {
                pool: config.name,
                source,
            });
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let workers = workers
            .into_iter()
            .map(|endpoint| PoolWorker {
                endpoint: Arc::new(endpoint),
                in_flight: 0,
            })
            .collect();

        info!(pool = %config.name, "Worker pool ready");

        Ok(Self {
            inner: Arc::new(PoolInner {
                next_worker_id: AtomicUsize::new(config.size),
                config,
                entry,
                runtime: Handle::current(),
                state: Mutex::new(PoolState {
                    status: PoolStatus::Running,
                    workers,
                    waiting: VecDeque::new(),
                    respawning: false,
                }),
                events: RwLock::new(Some(events)),
                load: LoadTracker::default(),
                tracker: TaskTracker::new(),
                closed: CancellationToken::new(),
            }),
        })
    }

    /// Submit a task
    ///
    /// The task goes to the least-busy worker with spare capacity. If every
    /// worker is at capacity it waits in FIFO order, unless the wait queue is
    /// full, in which case this fails immediately with
    /// [`PoolError::Backpressure`].
    pub fn queue(&self, task: Task) -> Result<TaskHandle, PoolError> {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        if state.status != PoolStatus::Running {
            return Err(PoolError::Terminated(inner.config.name.clone()));
        }
        if state.workers.is_empty() && !state.respawning {
            return Err(PoolError::NoWorkers(inner.config.name.clone()));
        }

        let id = TaskId::new();
        let (handle, reply) = TaskHandle::new(id);
        let pending = PendingTask { id, task, reply };

        match inner.select(&state) {
            Some(position) => inner.dispatch(&mut state, position, pending),
            None => {
                let queued = state.waiting.len();
                if !has_queue_room(queued, inner.config.max_queued_jobs) {
                    debug!(pool = %inner.config.name, queued, "Rejecting task, wait queue is full");
                    return Err(PoolError::Backpressure {
                        pool: inner.config.name.clone(),
                        queued,
                        limit: inner.config.max_queued_jobs.unwrap_or(queued),
                    });
                }
                state.waiting.push_back(pending);
                inner.load.task_queued();
                inner.emit(WorkerEvent::TaskQueued { task_id: id });
                debug!(
                    pool = %inner.config.name,
                    task_id = %id,
                    queued = queued + 1,
                    "All workers busy, task queued"
                );
            }
        }

        Ok(handle)
    }

    /// Subscribe to pool events
    ///
    /// Only events emitted after subscribing are received. After `terminate`
    /// the returned receiver is already closed.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        match self.inner.events.read().as_ref() {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = broadcast::channel(1);
                drop(sender);
                receiver
            }
        }
    }

    /// Shut the pool down
    ///
    /// Idempotent; a concurrent second call waits for the first to finish.
    #[instrument(skip(self), fields(pool = %self.inner.config.name))]
    pub async fn terminate(&self) {
        let inner = &self.inner;
        let endpoints = {
            let mut state = inner.state.lock();
            if state.status != PoolStatus::Running {
                None
            } else {
                state.status = PoolStatus::Terminating;
                inner.abort_waiting(&mut state, "pool terminated");
                Some(
                    state
                        .workers
                        .drain(..)
                        .map(|worker| worker.endpoint)
                        .collect::<Vec<_>>(),
                )
            }
        };

        let Some(endpoints) = endpoints else {
            inner.closed.cancelled().await;
            return;
        };

        info!(
            workers = endpoints.len(),
            in_flight = inner.load.in_flight(),
            "Terminating worker pool"
        );

        // Terminate is queued behind in-flight calls, so those still reply
        join_all(endpoints.iter().map(|endpoint| endpoint.terminate())).await;

        inner.tracker.close();
        inner.tracker.wait().await;

        inner.state.lock().status = PoolStatus::Terminated;
        inner.events.write().take();
        inner.closed.cancel();

        info!("Worker pool terminated");
    }

    /// Current status
    pub fn status(&self) -> PoolStatus {
        self.inner.state.lock().status
    }

    /// Current load
    pub fn stats(&self) -> PoolStats {
        let workers = self.inner.state.lock().workers.len();
        self.inner.load.snapshot(workers)
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.config.name)
            .field("status", &self.status())
            .field("stats", &self.stats())
            .finish()
    }
}

impl PoolInner {
    fn select(&self, state: &PoolState) -> Option<usize> {
        least_busy(
            state.workers.iter().map(|worker| {
                let load = if worker.endpoint.is_alive() {
                    worker.in_flight
                } else {
                    usize::MAX
                };
                (worker.endpoint.id(), load)
            }),
            self.config.concurrency_per_worker,
        )
    }

    /// Hand a task to a worker. Called with the state lock held.
    fn dispatch(self: &Arc<Self>, state: &mut PoolState, position: usize, pending: PendingTask) {
        let PendingTask { id, task, reply } = pending;
        let worker = &mut state.workers[position];
        let endpoint = Arc::clone(&worker.endpoint);
        let worker_id = endpoint.id();

        match endpoint.submit_call(task.function, task.args) {
            Ok(rx) => {
                worker.in_flight += 1;
                endpoint.handle().set_state(WorkerState::Busy);
                self.load.task_started();
                self.emit(WorkerEvent::TaskStarted { task_id: id, worker_id });
                debug!(pool = %self.config.name, task_id = %id, %worker_id, "Task dispatched");

                let inner = Arc::clone(self);
                self.tracker.spawn_on(
                    async move {
                        let result = await_reply(rx).await;
                        inner.finish_task(id, &endpoint, reply, result);
                    },
                    &self.runtime,
                );
            }
            Err(err) => {
                // The worker died between selection and dispatch
                self.load.task_started();
                self.settle(id, worker_id, reply, Err(err.clone()));
                self.remove_worker(state, worker_id, err.to_string());
            }
        }
    }

    fn finish_task(
        self: &Arc<Self>,
        id: TaskId,
        endpoint: &WorkerEndpoint,
        reply: oneshot::Sender<Result<Payload, TaskError>>,
        result: Result<Payload, CallError>,
    ) {
        let worker_id = endpoint.id();
        let lost = match &result {
            Ok(_) => false,
            Err(err) => err.is_worker_lost(),
        };
        let reason = match &result {
            Err(err) if lost => Some(err.to_string()),
            _ => None,
        };

        let mut state = self.state.lock();
        if let Some(worker) = state.workers.iter_mut().find(|w| w.endpoint.id() == worker_id) {
            worker.in_flight = worker.in_flight.saturating_sub(1);
            if worker.in_flight == 0 {
                endpoint.handle().set_state(WorkerState::Ready);
            }
        }

        self.settle(id, worker_id, reply, result);

        if let Some(reason) = reason {
            self.remove_worker(&mut state, worker_id, reason);
        }
        self.drain(&mut state);
    }

    /// Emit the terminal event and resolve the task handle
    fn settle(
        &self,
        id: TaskId,
        worker_id: WorkerId,
        reply: oneshot::Sender<Result<Payload, TaskError>>,
        result: Result<Payload, CallError>,
    ) {
        self.load.task_finished(result.is_ok());
        match &result {
            Ok(payload) => {
                if self.has_subscribers() {
                    self.emit(WorkerEvent::TaskCompleted {
                        task_id: id,
                        worker_id,
                        result: payload.clone(),
                    });
                }
                debug!(pool = %self.config.name, task_id = %id, %worker_id, "Task completed");
            }
            Err(err) => {
                self.emit(WorkerEvent::TaskFailed {
                    task_id: id,
                    worker_id: Some(worker_id),
                    error: TaskError::Call(err.clone()),
                });
                debug!(
                    pool = %self.config.name,
                    task_id = %id,
                    %worker_id,
                    error = %err,
                    "Task failed"
                );
            }
        }
        let _ = reply.send(result.map_err(TaskError::Call));
    }

    /// Drop a crashed worker and replace it if the pool fell below its floor
    fn remove_worker(self: &Arc<Self>, state: &mut PoolState, worker_id: WorkerId, reason: String) {
        let Some(position) = state.workers.iter().position(|w| w.endpoint.id() == worker_id) else {
            return;
        };
        let worker = state.workers.remove(position);

        error!(
            pool = %self.config.name,
            %worker_id,
            error = %reason,
            remaining = state.workers.len(),
            "Worker lost, removing it from the pool"
        );
        self.emit(WorkerEvent::WorkerError {
            worker_id,
            error: reason,
        });

        let endpoint = worker.endpoint;
        self.tracker.spawn_on(async move { endpoint.terminate().await }, &self.runtime);

        if state.status == PoolStatus::Running
            && state.workers.len() < self.config.min_workers
            && !state.respawning
        {
            state.respawning = true;
            self.spawn_replacement();
        } else if state.workers.is_empty() && !state.respawning {
            self.abort_waiting(state, "no live workers");
        }
    }

    fn spawn_replacement(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let worker_id = WorkerId(self.next_worker_id.fetch_add(1, Ordering::Relaxed));
        info!(pool = %self.config.name, %worker_id, "Spawning replacement worker");

        self.tracker.spawn_on(
            async move {
                let started =
                    start_worker(Arc::clone(&inner.entry), &inner.config, worker_id).await;
                let leftover = inner.adopt_replacement(worker_id, started);
                if let Some(endpoint) = leftover {
                    endpoint.terminate().await;
                }
            },
            &self.runtime,
        );
    }

    /// Add a replacement worker; returns it back if the pool no longer wants it
    fn adopt_replacement(
        self: &Arc<Self>,
        worker_id: WorkerId,
        started: Result<WorkerEndpoint, StartError>,
    ) -> Option<WorkerEndpoint> {
        let mut state = self.state.lock();
        state.respawning = false;

        match started {
            Ok(endpoint) if state.status == PoolStatus::Running => {
                info!(pool = %self.config.name, %worker_id, "Replacement worker ready");
                state.workers.push(PoolWorker {
                    endpoint: Arc::new(endpoint),
                    in_flight: 0,
                });
                self.drain(&mut state);
                None
            }
            Ok(endpoint) => Some(endpoint),
            Err(err) => {
                error!(
                    pool = %self.config.name,
                    %worker_id,
                    error = %err,
                    "Replacement worker failed to start"
                );
                self.emit(WorkerEvent::WorkerError {
                    worker_id,
                    error: err.to_string(),
                });
                if state.workers.is_empty() {
                    self.abort_waiting(&mut state, "no live workers");
                }
                None
            }
        }
    }

    /// Dispatch waiting tasks while workers have capacity
    fn drain(self: &Arc<Self>, state: &mut PoolState) {
        if state.status != PoolStatus::Running {
            return;
        }
        while !state.waiting.is_empty() {
            let Some(position) = self.select(state) else {
                break;
            };
            let Some(pending) = state.waiting.pop_front() else {
                break;
            };
            self.load.task_dequeued();
            self.dispatch(state, position, pending);
        }
    }

    fn abort_waiting(&self, state: &mut PoolState, reason: &str) {
        if state.waiting.is_empty() {
            return;
        }
        warn!(
            pool = %self.config.name,
            count = state.waiting.len(),
            reason,
            "Aborting waiting tasks"
        );
        for pending in state.waiting.drain(..) {
            self.load.task_aborted();
            self.emit(WorkerEvent::TaskFailed {
                task_id: pending.id,
                worker_id: None,
                error: TaskError::Aborted,
            });
            let _ = pending.reply.send(Err(TaskError::Aborted));
        }
    }

    fn emit(&self, event: WorkerEvent) {
        if let Some(sender) = self.events.read().as_ref() {
            let _ = sender.send(event);
        }
    }

    fn has_subscribers(&self) -> bool {
        self.events
            .read()
            .as_ref()
            .is_some_and(|sender| sender.receiver_count() > 0)
    }
}

/// Spawn one worker and initialize its module
async fn start_worker(
    entry: Arc<dyn ModuleEntry>,
    config: &PoolConfig,
    worker_id: WorkerId,
) -> Result<WorkerEndpoint, StartError> {
    let options = SpawnOptions::new(&config.name, worker_id).with_timeout(config.spawn_timeout);
    let endpoint = WorkerEndpoint::spawn(entry, options).await?;
    if let Err(err) = endpoint.init().await {
        endpoint.terminate().await;
        return Err(err.into());
    }
    Ok(endpoint)
}
