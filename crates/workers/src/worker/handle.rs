//! Worker handle: command channel, identity and state

use std::fmt;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{CallError, LoadError};
use crate::module::{ModuleError, Payload};
use crate::stream::StreamCallbacks;

/// Worker identity, unique within a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Worker state
///
/// ```text
/// Idle ─handshake─► Ready ─init─► Initializing ─► Ready ◄──► Busy
///                                                   │
///                                                   ▼
///                                     Terminating ──► Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Thread created, handshake not yet acknowledged
    Idle,
    /// Module `initialize` in flight
    Initializing,
    /// Accepting commands
    Ready,
    /// Has in-flight work
    Busy,
    /// Terminate requested
    Terminating,
    /// Thread finished
    Terminated,
}

/// Commands served by a worker thread, in order
pub(crate) enum Command {
    Handshake {
        ack: oneshot::Sender<Result<(), ModuleError>>,
    },
    Init {
        reply: oneshot::Sender<Result<(), LoadError>>,
    },
    Call {
        function: String,
        args: Payload,
        reply: oneshot::Sender<Result<Payload, CallError>>,
    },
    Stream {
        function: String,
        args: Payload,
        callbacks: StreamCallbacks,
    },
    Terminate,
}

impl Command {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "handshake",
            Self::Init { .. } => "init",
            Self::Call { .. } => "call",
            Self::Stream { .. } => "stream",
            Self::Terminate => "terminate",
        }
    }
}

/// Opaque handle to one worker thread
///
/// Created by [`spawn_worker`](super::spawn_worker); owned by exactly one pool
/// or lifecycle, which is the only writer of its state. Dropping the handle
/// asks the thread to exit without waiting for it.
pub struct WorkerHandle {
    id: WorkerId,
    name: String,
    commands: mpsc::UnboundedSender<Command>,
    state: Mutex<WorkerState>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    pub(crate) fn new(
        id: WorkerId,
        name: String,
        commands: mpsc::UnboundedSender<Command>,
        thread: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            name,
            commands,
            state: Mutex::new(WorkerState::Idle),
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Worker id
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        let mut current = self.state.lock();
        // Terminal states stick
        if matches!(*current, WorkerState::Terminating | WorkerState::Terminated)
            && !matches!(state, WorkerState::Terminated)
        {
            return;
        }
        *current = state;
    }

    /// Whether the worker thread is still receiving commands
    pub fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Enqueue a command; hands it back if the thread is gone
    pub(crate) fn send(&self, command: Command) -> Result<(), Command> {
        self.commands.send(command).map_err(|e| e.0)
    }

    /// Ask the thread to exit after already-queued commands and wait for it
    ///
    /// Idempotent. The join runs on the blocking pool so the executor is never
    /// blocked by a long-running module call.
    pub async fn terminate(&self) {
        let thread = self.thread.lock().take();
        let Some(thread) = thread else {
            return;
        };

        self.set_state(WorkerState::Terminating);
        let _ = self.send(Command::Terminate);
        debug!(worker_id = %self.id, worker = %self.name, "Waiting for worker thread to exit");

        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!(worker_id = %self.id, "Worker thread panicked"),
            Err(e) => warn!(worker_id = %self.id, error = %e, "Failed to join worker thread"),
        }
        self.set_state(WorkerState::Terminated);
    }

    /// Ask the thread to exit without waiting for it
    ///
    /// Used when a worker is unresponsive; the thread exits once whatever it is
    /// doing returns.
    pub(crate) fn abandon(&self) {
        self.set_state(WorkerState::Terminating);
        let _ = self.send(Command::Terminate);
        self.thread.lock().take();
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.thread.get_mut().is_some() {
            let _ = self.commands.send(Command::Terminate);
        }
    }
}
