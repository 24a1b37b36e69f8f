//! Async surface of one worker

use std::sync::Arc;

use tokio::sync::{oneshot, OnceCell};
use tracing::{info, instrument, warn};

use super::handle::{Command, WorkerHandle, WorkerId, WorkerState};
use super::spawn::{spawn_worker, SpawnOptions};
use crate::error::{CallError, LoadError, SpawnError};
use crate::module::{ModuleEntry, Payload};
use crate::stream::{bridge, TaskStream};

/// Per-worker surface: `init`, `call`, `stream`
///
/// # Example
///
/// ```ignore
/// let endpoint = WorkerEndpoint::spawn(entry, SpawnOptions::new("parser", WorkerId(0))).await?;
/// endpoint.init().await?;
/// let tree = endpoint.call("finalizeTree", payload).await?;
/// endpoint.terminate().await;
/// ```
#[derive(Debug)]
pub struct WorkerEndpoint {
    handle: WorkerHandle,
    initialized: OnceCell<()>,
}

impl WorkerEndpoint {
    /// Wrap a freshly spawned handle
    pub fn new(handle: WorkerHandle) -> Self {
        Self {
            handle,
            initialized: OnceCell::new(),
        }
    }

    /// Spawn a worker and wrap it
    pub async fn spawn(
        entry: Arc<dyn ModuleEntry>,
        options: SpawnOptions,
    ) -> Result<Self, SpawnError> {
        spawn_worker(entry, options).await.map(Self::new)
    }

    /// Initialize the module runtime inside the worker
    ///
    /// Runs at most once. Concurrent and repeated calls share the single
    /// initialization; a failed attempt can be retried.
    #[instrument(skip(self), fields(worker_id = %self.handle.id()))]
    pub async fn init(&self) -> Result<(), LoadError> {
        self.initialized
            .get_or_try_init(|| async {
                self.handle.set_state(WorkerState::Initializing);

                let (reply, rx) = oneshot::channel();
                if self.handle.send(Command::Init { reply }).is_err() {
                    return Err(LoadError::WorkerLost);
                }
                let result = rx.await.unwrap_or(Err(LoadError::WorkerLost));

                self.handle.set_state(WorkerState::Ready);
                match &result {
                    Ok(()) => info!(worker = %self.handle.name(), "Worker initialized"),
                    Err(err) => {
                        warn!(
                            worker = %self.handle.name(),
                            error = %err,
                            "Worker initialization failed"
                        );
                    }
                }
                result
            })
            .await
            .map(|_| ())
    }

    /// Whether `init` has completed successfully
    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    /// Enqueue a call on the worker channel and return the reply receiver
    ///
    /// Enqueueing is synchronous so callers can rely on per-worker order.
    pub(crate) fn submit_call(
        &self,
        function: String,
        args: Payload,
    ) -> Result<oneshot::Receiver<Result<Payload, CallError>>, CallError> {
        if !self.is_initialized() {
            return Err(CallError::Uninitialized);
        }
        let (reply, rx) = oneshot::channel();
        self.handle
            .send(Command::Call {
                function,
                args,
                reply,
            })
            .map_err(|_| CallError::WorkerLost)?;
        Ok(rx)
    }

    /// Request/response invocation of a module function
    pub async fn call(&self, function: &str, args: Payload) -> Result<Payload, CallError> {
        let rx = self.submit_call(function.to_string(), args)?;
        await_reply(rx).await
    }

    /// Streaming invocation of a module function
    ///
    /// Items arrive on the returned stream in production order, followed by at
    /// most one error. Dropping or cancelling the stream asks the module to stop.
    pub fn stream(&self, function: &str, args: Payload) -> Result<TaskStream, CallError> {
        if !self.is_initialized() {
            return Err(CallError::Uninitialized);
        }
        let (callbacks, stream) = bridge(format!("{}:{}", self.handle.name(), function));
        self.handle
            .send(Command::Stream {
                function: function.to_string(),
                args,
                callbacks,
            })
            .map_err(|_| CallError::WorkerLost)?;
        Ok(stream)
    }

    /// Terminate the worker after already-queued commands and wait for it
    pub async fn terminate(&self) {
        self.handle.terminate().await;
    }

    /// Worker id
    pub fn id(&self) -> WorkerId {
        self.handle.id()
    }

    /// Thread name
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Current worker state
    pub fn state(&self) -> WorkerState {
        self.handle.state()
    }

    /// Whether the worker thread is still serving commands
    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }

    pub(crate) fn handle(&self) -> &WorkerHandle {
        &self.handle
    }
}

/// Await a call reply; a dropped reply means the worker went away
pub(crate) async fn await_reply(
    rx: oneshot::Receiver<Result<Payload, CallError>>,
) -> Result<Payload, CallError> {
    rx.await.unwrap_or(Err(CallError::WorkerLost))
}
