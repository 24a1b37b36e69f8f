//! Worker units
//!
//! A worker is an OS thread that owns one computation module instance and
//! serves commands from an unbounded channel, one at a time, in arrival order.
//!
//! - [`spawn_worker`] creates the thread and performs the bounded handshake
//! - [`WorkerEndpoint`] is the async surface (`init`, `call`, `stream`)
//! - [`WorkerHandle`] is the raw channel + identity + state, owned by a pool or lifecycle

mod endpoint;
mod handle;
mod runtime;
mod spawn;

pub(crate) use endpoint::await_reply;
pub use endpoint::WorkerEndpoint;
pub(crate) use handle::Command;
pub use handle::{WorkerHandle, WorkerId, WorkerState};
pub use spawn::{spawn_worker, SpawnOptions, DEFAULT_SPAWN_TIMEOUT};
