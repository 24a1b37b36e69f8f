//! # Worker Orchestration Substrate
//!
//! Runs CPU-heavy analysis, implemented by an opaque computation module, off the
//! caller's thread on a pool of isolated workers.
//!
//! ## Features
//!
//! - **Isolated workers**: every worker is an OS thread hosting its own module instance,
//!   reached only through message passing
//! - **Bounded spawn handshake**: a worker that does not acknowledge in time is abandoned
//! - **Two interaction styles**: request/response calls and streams of incrementally produced items
//! - **Fixed-size pool**: least-busy scheduling, per-worker ordering, fail-fast backpressure
//! - **Single-flight lifecycle**: at most one start/stop transition in flight for one-shot workers
//! - **Event fan-out**: pool events are multicast and can be wired into application state
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │           TaskDispatchFacade (dispatch::wire)               │
//! │  (pool events → TaskNotifier::task_completed)               │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                              │ WorkerEvent (broadcast)
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       WorkerPool                            │
//! │  (least-busy dispatch, wait queue, crash handling)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ Command (mpsc)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   WorkerEndpoint ──► worker thread ──► ComputationModule    │
//! │   (init / call / stream)          (loaded by ModuleEntry)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use cladeworks_workers::prelude::*;
//!
//! let pool = WorkerPool::create(entry, PoolConfig::new("analysis").with_size(4)).await?;
//! let handle = pool.queue(Task::new("runAnalysis", Payload::text(record)))?;
//! let result = handle.await?;
//! pool.terminate().await;
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod module;
pub mod pool;
pub mod stream;
pub mod telemetry;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigError, PoolConfig};
    pub use crate::dispatch::{wire, DispatchHandle, TaskCompletedNotification, TaskNotifier};
    pub use crate::error::{
        CallError, LifecycleError, LoadError, PoolError, SpawnError, StreamError, TaskError,
    };
    pub use crate::lifecycle::{Lifecycle, ManagedLifecycle};
    pub use crate::module::{ComputationModule, ModuleEntry, ModuleError, Payload};
    pub use crate::pool::{Task, TaskHandle, TaskId, WorkerEvent, WorkerPool};
    pub use crate::stream::{StreamCallbacks, StreamObserver, Subscription, TaskStream};
    pub use crate::worker::{spawn_worker, SpawnOptions, WorkerEndpoint, WorkerHandle, WorkerId};
}

// Re-export key types at crate root
pub use config::{ConfigError, PoolConfig};
pub use dispatch::{
    notify_fn, wire, DispatchHandle, DispatchStats, TaskCompletedNotification, TaskNotifier,
};
pub use error::{
    CallError, LifecycleError, LoadError, PoolError, SpawnError, StreamError, TaskError,
};
pub use lifecycle::{Lifecycle, LifecyclePhase, ManagedLifecycle};
pub use module::{ComputationModule, ModuleEntry, ModuleError, Payload};
pub use pool::{PoolStats, PoolStatus, Task, TaskHandle, TaskId, WorkerEvent, WorkerPool};
pub use stream::{bridge, StreamCallbacks, StreamObserver, Subscription, TaskStream};
pub use worker::{
    spawn_worker, SpawnOptions, WorkerEndpoint, WorkerHandle, WorkerId, WorkerState,
};
