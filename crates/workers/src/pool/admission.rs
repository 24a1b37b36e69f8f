//! Admission control for worker pools
//!
//! Worker selection, wait queue limits and load counters.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::worker::WorkerId;

/// Pick the least-busy worker with spare capacity
///
/// `loads` yields `(id, in_flight)` per worker in pool order. Ties go to the
/// lowest id. Returns the position of the chosen worker.
pub(crate) fn least_busy(
    loads: impl IntoIterator<Item = (WorkerId, usize)>,
    concurrency_per_worker: usize,
) -> Option<usize> {
    loads
        .into_iter()
        .enumerate()
        .filter(|(_, (_, in_flight))| *in_flight < concurrency_per_worker)
        .min_by_key(|(_, (id, in_flight))| (*in_flight, *id))
        .map(|(position, _)| position)
}

/// Whether one more task fits in the wait queue
pub(crate) fn has_queue_room(queued: usize, limit: Option<usize>) -> bool {
    limit.map_or(true, |limit| queued < limit)
}

/// Load counters for a pool
///
/// Uses atomic operations so readers never take the pool lock.
#[derive(Debug, Default)]
pub(crate) struct LoadTracker {
    in_flight: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl LoadTracker {
    /// Record that a task was handed to a worker
    pub fn task_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that a dispatched task settled
    pub fn task_finished(&self, success: bool) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        if success {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record that a task entered the wait queue
    pub fn task_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that a task left the wait queue
    pub fn task_dequeued(&self) {
        self.queued.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record that a waiting task was aborted
    pub fn task_aborted(&self) {
        self.task_dequeued();
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, workers: usize) -> PoolStats {
        PoolStats {
            workers,
            in_flight: self.in_flight.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Live workers
    pub workers: usize,
    /// Tasks currently running on a worker
    pub in_flight: usize,
    /// Tasks waiting for a free worker
    pub queued: usize,
    /// Tasks that returned a result
    pub completed: usize,
    /// Tasks that failed or were aborted
    pub failed: usize,
}
