//! Error types for the orchestration layer
//!
//! Worker-local failures are wrapped into these structured errors at the
//! endpoint boundary and returned to the specific caller. They never bring
//! down the pool or other in-flight work.

use std::time::Duration;

use crate::config::ConfigError;
use crate::module::ModuleError;

/// Module load or initialization failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    /// The module raised while loading or initializing
    #[error("module raised during load: {0}")]
    Module(#[source] ModuleError),

    /// The worker exited before it answered
    #[error("worker exited before the module was ready")]
    WorkerLost,
}

/// Failure to bring up a worker
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    /// The worker did not acknowledge the handshake in time
    #[error("worker {worker} did not acknowledge the handshake within {timeout:?}")]
    Timeout { worker: String, timeout: Duration },

    /// The worker raised while constructing the module
    #[error("worker {worker} failed to load its module")]
    LoadFailure {
        worker: String,
        #[source]
        source: LoadError,
    },

    /// The OS refused to create the worker thread
    #[error("failed to create worker thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Request/response call failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// The module returned an error or panicked
    #[error("module call failed: {0}")]
    ModuleThrew(ModuleError),

    /// `call`/`stream` was used before `init` completed
    #[error("module is not initialized")]
    Uninitialized,

    /// The worker exited before replying
    #[error("worker exited before replying")]
    WorkerLost,
}

impl CallError {
    /// Whether the worker that produced this error is gone
    pub fn is_worker_lost(&self) -> bool {
        match self {
            Self::WorkerLost => true,
            Self::ModuleThrew(err) => err.fatal,
            Self::Uninitialized => false,
        }
    }
}

/// Failure delivered through a result stream
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    /// The module reported an error while producing items
    #[error("module stream failed: {0}")]
    ModuleThrew(ModuleError),

    /// The worker went away before the stream terminated
    #[error("worker exited before the stream terminated")]
    WorkerLost,
}

/// Outcome error of a task queued on a pool
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    /// The worker call failed
    #[error(transparent)]
    Call(#[from] CallError),

    /// The task never ran (pool terminated or emptied while it waited)
    #[error("task aborted before it was dispatched")]
    Aborted,
}

/// Failure to spawn and initialize a worker in one step
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("worker initialization failed: {0}")]
    Init(#[from] LoadError),
}

/// Pool-level errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A worker failed to spawn or initialize while creating the pool
    #[error("pool {pool} failed to initialize")]
    InitFailure {
        pool: String,
        #[source]
        source: StartError,
    },

    /// Every worker is busy and the wait queue is full
    #[error("pool {pool} is saturated ({queued} queued, limit {limit})")]
    Backpressure {
        pool: String,
        queued: usize,
        limit: usize,
    },

    /// The pool no longer accepts tasks
    #[error("pool {0} is terminated")]
    Terminated(String),

    /// Every worker has been lost and none could be replaced
    #[error("pool {0} has no live workers")]
    NoWorkers(String),

    /// Invalid configuration
    #[error("invalid pool configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Lifecycle re-entrancy
///
/// Never returned to callers: a second `start` is silently ignored. The error
/// exists so the ignored attempt can be logged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LifecycleError {
    #[error("{0} is already starting or running")]
    AlreadyRunning(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_module_error_counts_as_lost_worker() {
        assert!(CallError::WorkerLost.is_worker_lost());
        assert!(CallError::ModuleThrew(ModuleError::fatal("boom")).is_worker_lost());
        assert!(!CallError::ModuleThrew(ModuleError::new("boom")).is_worker_lost());
        assert!(!CallError::Uninitialized.is_worker_lost());
    }

    #[test]
    fn test_error_messages() {
        let err = PoolError::Backpressure {
            pool: "analysis".into(),
            queued: 3,
            limit: 3,
        };
        assert_eq!(
            err.to_string(),
            "pool analysis is saturated (3 queued, limit 3)"
        );

        let err = TaskError::from(CallError::Uninitialized);
        assert_eq!(err.to_string(), "module is not initialized");
    }
}
