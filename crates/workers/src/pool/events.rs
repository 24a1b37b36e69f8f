//! Pool events

use serde::{Serialize, Serializer};

use crate::error::TaskError;
use crate::module::Payload;
use crate::worker::WorkerId;

use super::task::TaskId;

/// Capacity of the pool's event channel; slower subscribers lag
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Task and worker transitions, multicast to every subscriber
///
/// Late subscribers miss earlier events; there is no replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// All workers were busy; the task is waiting
    TaskQueued { task_id: TaskId },

    /// The task was handed to a worker
    TaskStarted { task_id: TaskId, worker_id: WorkerId },

    /// The worker returned a result
    TaskCompleted {
        task_id: TaskId,
        worker_id: WorkerId,
        result: Payload,
    },

    /// The task failed or was aborted before dispatch (`worker_id` is `None` then)
    TaskFailed {
        task_id: TaskId,
        #[serde(skip_serializing_if = "Option::is_none")]
        worker_id: Option<WorkerId>,
        #[serde(serialize_with = "error_message")]
        error: TaskError,
    },

    /// A worker crashed or could not be replaced
    WorkerError { worker_id: WorkerId, error: String },
}

impl WorkerEvent {
    /// Task the event refers to, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::TaskQueued { task_id }
            | Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. } => Some(*task_id),
            Self::WorkerError { .. } => None,
        }
    }

    /// Whether the event settles a task
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TaskCompleted { .. } | Self::TaskFailed { .. })
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::TaskQueued { .. } => "task_queued",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::WorkerError { .. } => "worker_error",
        }
    }
}

fn error_message<S: Serializer>(error: &TaskError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let task_id = TaskId::new();
        let completed = WorkerEvent::TaskCompleted {
            task_id,
            worker_id: WorkerId(0),
            result: Payload::Empty,
        };
        assert_eq!(completed.task_id(), Some(task_id));
        assert!(completed.is_terminal());
        assert_eq!(completed.name(), "task_completed");

        let queued = WorkerEvent::TaskQueued { task_id };
        assert!(!queued.is_terminal());

        let crashed = WorkerEvent::WorkerError {
            worker_id: WorkerId(1),
            error: "boom".into(),
        };
        assert_eq!(crashed.task_id(), None);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let task_id = TaskId::new();
        let aborted = WorkerEvent::TaskFailed {
            task_id,
            worker_id: None,
            error: TaskError::Aborted,
        };

        let json = serde_json::to_value(&aborted).unwrap();
        assert_eq!(json["type"], aborted.name());
        assert_eq!(json["task_id"], task_id.to_string());
        assert_eq!(json["error"], "task aborted before it was dispatched");
        assert!(json.get("worker_id").is_none());

        let started = WorkerEvent::TaskStarted {
            task_id,
            worker_id: WorkerId(2),
        };
        let json = serde_json::to_value(&started).unwrap();
        assert_eq!(json["type"], "task_started");
        assert_eq!(json["worker_id"], 2);
    }
}
