//! Fixed-size worker pool
//!
//! ```text
//!            queue(task)
//!                 │
//!                 ▼
//!      ┌─────────────────────┐  none free   ┌──────────────┐
//!      │ least-busy selection│ ───────────► │ wait queue   │──► Backpressure
//!      └─────────────────────┘              │ (FIFO, bound)│    when full
//!                 │                         └──────────────┘
//!                 ▼                                │ drained on completion
//!      worker-0  worker-1  ...  worker-n ◄─────────┘
//!                 │
//!                 ▼
//!      WorkerEvent (broadcast) ──► dispatch::wire
//! ```

mod admission;
mod events;
mod task;
mod worker_pool;

pub use admission::PoolStats;
pub use events::WorkerEvent;
pub use task::{Task, TaskHandle, TaskId};
pub use worker_pool::{PoolStatus, WorkerPool};
