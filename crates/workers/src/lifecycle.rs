//! Single-flight lifecycle for one-shot workers
//!
//! ```text
//! Idle ──start()──► Starting ──start fn ok──► Running ──run done──► Stopping ──► Idle
//!   ▲                   │                                              ▲
//!   └───start fn err────┘                     stop() ──────────────────┘
//! ```
//!
//! A single atomic lock covers the whole transient span: it is taken by
//! `start()` and released only when the handle has been torn down. A `start()`
//! that finds the lock taken returns `None` without side effects.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::LifecycleError;

/// Behaviour managed by a [`ManagedLifecycle`]
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Whatever `start` brings up (typically a worker endpoint)
    type Handle: Send + Sync + 'static;
    /// Result of the unit of work
    type Output: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Bring the handle up (spawn + init)
    async fn start(&self) -> Result<Self::Handle, Self::Error>;

    /// Run the unit of work
    async fn run(&self, handle: &Self::Handle) -> Result<Self::Output, Self::Error>;

    /// Tear the handle down
    async fn stop(&self, handle: Arc<Self::Handle>) -> Result<(), Self::Error>;
}

/// Lifecycle phase as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Idle,
    Busy,
}

/// Single-flight guard around a [`Lifecycle`]
///
/// `start()` runs start → run → stop as one unit; only one such unit can be in
/// flight at a time.
pub struct ManagedLifecycle<L: Lifecycle> {
    name: String,
    lifecycle: L,
    locked: AtomicBool,
    handle: Mutex<Option<Arc<L::Handle>>>,
}

impl<L: Lifecycle> ManagedLifecycle<L> {
    pub fn new(name: impl Into<String>, lifecycle: L) -> Self {
        Self {
            name: name.into(),
            lifecycle,
            locked: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Start, run one unit of work, and stop
    ///
    /// Returns `None` without invoking the start fn if a start or stop is
    /// already in flight. Otherwise returns the result of the start fn (on
    /// failure) or of the unit of work. Stop always runs once the work settles,
    /// including when it panics; the panic is re-raised after the stop. A stop
    /// failure is logged.
    #[instrument(skip(self), fields(lifecycle = %self.name))]
    pub async fn start(&self) -> Option<Result<L::Output, L::Error>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(reason = %LifecycleError::AlreadyRunning(self.name.clone()), "Ignoring start");
            return None;
        }

        let mut cleanup = Cleanup::new(&self.locked, &self.handle);

        let handle = match self.lifecycle.start().await {
            Ok(handle) => Arc::new(handle),
            Err(err) => {
                warn!(error = %err, "Start failed");
                return Some(Err(err));
            }
        };
        *self.handle.lock() = Some(Arc::clone(&handle));
        cleanup.track(Arc::clone(&handle));
        info!("Started");

        let output = AssertUnwindSafe(self.lifecycle.run(&handle))
            .catch_unwind()
            .await;
        cleanup.disarm();
        drop(handle);

        if let Err(err) = self.stop_matching(cleanup.expected.take()).await {
            warn!(error = %err, "Stop after run failed");
        }
        match output {
            Ok(output) => Some(output),
            Err(payload) => {
                warn!("Run panicked, handle was stopped");
                panic::resume_unwind(payload)
            }
        }
    }

    /// Stop whatever is running
    ///
    /// No-op when nothing is running. The handle and the lock are cleared on
    /// every exit path, including a failing or panicking stop fn.
    #[instrument(skip(self), fields(lifecycle = %self.name))]
    pub async fn stop(&self) -> Result<(), L::Error> {
        self.stop_matching(None).await
    }

    /// Whether a start, run or stop is in flight
    pub fn is_running(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> LifecyclePhase {
        if self.is_running() {
            LifecyclePhase::Busy
        } else {
            LifecyclePhase::Idle
        }
    }

    /// The running handle, if any
    pub fn current(&self) -> Option<Arc<L::Handle>> {
        self.handle.lock().clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the current handle, or only `expected` when given
    async fn stop_matching(&self, expected: Option<Arc<L::Handle>>) -> Result<(), L::Error> {
        let handle = {
            let mut slot = self.handle.lock();
            match (&expected, slot.as_ref()) {
                (Some(expected), Some(current)) if !Arc::ptr_eq(expected, current) => None,
                _ => slot.take(),
            }
        };
        drop(expected);

        let Some(handle) = handle else {
            return Ok(());
        };

        // Releases the lock however stop exits
        let _release = Cleanup::new(&self.locked, &self.handle);
        let result = self.lifecycle.stop(handle).await;
        info!("Stopped");
        result
    }
}

/// Clears lifecycle state on drop
///
/// Without an expected handle it releases the lock unconditionally. With one,
/// it clears the slot and releases the lock only if the slot still holds that
/// handle; otherwise a concurrent `stop` owns the cleanup.
struct Cleanup<'a, H> {
    locked: &'a AtomicBool,
    slot: &'a Mutex<Option<Arc<H>>>,
    expected: Option<Arc<H>>,
    armed: bool,
}

impl<'a, H> Cleanup<'a, H> {
    fn new(locked: &'a AtomicBool, slot: &'a Mutex<Option<Arc<H>>>) -> Self {
        Self {
            locked,
            slot,
            expected: None,
            armed: true,
        }
    }

    fn track(&mut self, handle: Arc<H>) {
        self.expected = Some(handle);
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<H> Drop for Cleanup<'_, H> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.expected.take() {
            None => self.locked.store(false, Ordering::Release),
            Some(expected) => {
                let mut slot = self.slot.lock();
                if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, &expected)) {
                    slot.take();
                    self.locked.store(false, Ordering::Release);
                }
            }
        }
    }
}
