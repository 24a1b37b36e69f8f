//! Tasks and their result handles

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::TaskError;
use crate::module::Payload;

/// Task identifier (UUID v7, ordered by submission time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a new task id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A request/response unit of work for a pool
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Module function to call
    pub function: String,
    /// Arguments, forwarded untouched
    pub args: Payload,
}

impl Task {
    pub fn new(function: impl Into<String>, args: impl Into<Payload>) -> Self {
        Self {
            function: function.into(),
            args: args.into(),
        }
    }
}

/// Result sink of a queued task
///
/// Resolves once the assigned worker replies. If the pool drops the task
/// without running it, resolves with [`TaskError::Aborted`].
#[derive(Debug)]
#[must_use = "a task handle does nothing unless awaited"]
pub struct TaskHandle {
    id: TaskId,
    rx: oneshot::Receiver<Result<Payload, TaskError>>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId) -> (Self, oneshot::Sender<Result<Payload, TaskError>>) {
        let (tx, rx) = oneshot::channel();
        (Self { id, rx }, tx)
    }

    /// Id of the task, as reported in pool events
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl Future for TaskHandle {
    type Output = Result<Payload, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|reply| reply.unwrap_or(Err(TaskError::Aborted)))
    }
}
