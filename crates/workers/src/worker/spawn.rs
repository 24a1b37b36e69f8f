//! Worker spawning with a bounded handshake

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

use super::handle::{Command, WorkerHandle, WorkerId, WorkerState};
use super::runtime::run_worker;
use crate::error::{LoadError, SpawnError};
use crate::module::ModuleEntry;

/// Default handshake timeout
pub const DEFAULT_SPAWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for [`spawn_worker`]
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Worker id
    pub id: WorkerId,
    /// Thread name
    pub name: String,
    /// Maximum time to wait for the handshake acknowledgment
    pub timeout: Duration,
}

impl SpawnOptions {
    /// Options for worker `id` of the named pool (thread `<pool>-worker-<id>`)
    pub fn new(pool: &str, id: WorkerId) -> Self {
        Self {
            id,
            name: format!("{pool}-{id}"),
            timeout: DEFAULT_SPAWN_TIMEOUT,
        }
    }

    /// Set the handshake timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Create one worker thread and wait for it to acknowledge the handshake
///
/// The thread loads the module before acknowledging. On success the handle is
/// `Ready` and the module has not been initialized yet.
///
/// # Errors
///
/// - [`SpawnError::Timeout`] if no acknowledgment arrives within `options.timeout`;
///   the thread is told to terminate and abandoned
/// - [`SpawnError::LoadFailure`] if loading the module fails or panics
/// - [`SpawnError::Thread`] if the OS refuses to create the thread
#[instrument(skip(entry, options), fields(worker = %options.name, module = %entry.name()))]
pub async fn spawn_worker(
    entry: Arc<dyn ModuleEntry>,
    options: SpawnOptions,
) -> Result<WorkerHandle, SpawnError> {
    let (commands, receiver) = mpsc::unbounded_channel();

    let thread = std::thread::Builder::new().name(options.name.clone()).spawn({
        let entry = Arc::clone(&entry);
        let id = options.id;
        move || run_worker(entry, id, receiver)
    })?;
    let handle = WorkerHandle::new(options.id, options.name.clone(), commands, thread);

    let (ack, acknowledged) = oneshot::channel();
    // A failed send drops `ack`, which surfaces below as a lost worker
    let _ = handle.send(Command::Handshake { ack });

    match tokio::time::timeout(options.timeout, acknowledged).await {
        Ok(Ok(Ok(()))) => {
            handle.set_state(WorkerState::Ready);
            debug!(worker_id = %options.id, "Worker acknowledged handshake");
            Ok(handle)
        }
        Ok(Ok(Err(err))) => {
            handle.terminate().await;
            Err(SpawnError::LoadFailure {
                worker: options.name,
                source: LoadError::Module(err),
            })
        }
        Ok(Err(_)) => {
            handle.terminate().await;
            Err(SpawnError::LoadFailure {
                worker: options.name,
                source: LoadError::WorkerLost,
            })
        }
        Err(_) => {
            warn!(
                worker_id = %options.id,
                timeout_ms = options.timeout.as_millis() as u64,
                "Worker did not acknowledge handshake, abandoning it"
            );
            handle.abandon();
            Err(SpawnError::Timeout {
                worker: options.name,
                timeout: options.timeout,
            })
        }
    }
}
