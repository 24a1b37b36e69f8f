// Analysis pool
//
// The only pooled worker: every sequence record becomes one `runAnalysis`
// task. Typed on both ends so callers never touch raw payloads.

use std::sync::Arc;

use cladeworks_workers::{
    wire, DispatchHandle, ModuleEntry, PoolConfig, PoolStats, Task, TaskHandle, TaskId,
    TaskNotifier, WorkerEvent, WorkerPool,
};
use tokio::sync::broadcast;
use tracing::instrument;

use crate::error::AnalysisError;
use crate::module::functions;
use crate::types::{from_payload, to_payload, AnalysisResult, SequenceRecord};

/// Pool of nucleotide workers running `runAnalysis`
#[derive(Clone, Debug)]
pub struct AnalysisPool {
    pool: WorkerPool,
}

impl AnalysisPool {
    /// Spawn and initialize every worker
    #[instrument(skip(entry), fields(pool = %config.name, size = config.size))]
    pub async fn create(
        entry: Arc<dyn ModuleEntry>,
        config: PoolConfig,
    ) -> Result<Self, AnalysisError> {
        let pool = WorkerPool::create(entry, config).await?;
        Ok(Self { pool })
    }

    /// Queue one record for analysis
    ///
    /// Fails fast with [`AnalysisError::Pool`] on backpressure.
    pub fn submit(&self, record: &SequenceRecord) -> Result<AnalysisTask, AnalysisError> {
        let task = Task::new(functions::RUN_ANALYSIS, to_payload(record)?);
        let handle = self.pool.queue(task)?;
        Ok(AnalysisTask { handle })
    }

    /// Forward completions to `notifier`
    pub fn wire(&self, notifier: Arc<dyn TaskNotifier>) -> DispatchHandle {
        wire(&self.pool, notifier)
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.pool.events()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub async fn terminate(&self) {
        self.pool.terminate().await;
    }
}

/// A queued analysis
#[derive(Debug)]
#[must_use = "an analysis task does nothing unless awaited"]
pub struct AnalysisTask {
    handle: TaskHandle,
}

impl AnalysisTask {
    pub fn id(&self) -> TaskId {
        self.handle.id()
    }

    pub async fn result(self) -> Result<AnalysisResult, AnalysisError> {
        let payload = self.handle.await?;
        Ok(from_payload(&payload)?)
    }
}
