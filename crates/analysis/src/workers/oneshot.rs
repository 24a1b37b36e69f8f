// One-shot worker plumbing
//
// Short-lived workers (parser, tree finalizer, serializer) all follow the same
// shape: spawn + init, run exactly one operation, terminate. `OneShotWorker`
// holds the spawn/teardown half; `CallJob` is the lifecycle for a single
// request/response operation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cladeworks_workers::worker::DEFAULT_SPAWN_TIMEOUT;
use cladeworks_workers::{Lifecycle, ModuleEntry, Payload, SpawnOptions, WorkerEndpoint, WorkerId};
use tracing::warn;

use crate::error::AnalysisError;

/// Spawn/teardown half of a one-shot worker
#[derive(Clone)]
pub struct OneShotWorker {
    entry: Arc<dyn ModuleEntry>,
    name: String,
    spawn_timeout: Duration,
}

impl OneShotWorker {
    pub fn new(entry: Arc<dyn ModuleEntry>, name: impl Into<String>) -> Self {
        Self {
            entry,
            name: name.into(),
            spawn_timeout: DEFAULT_SPAWN_TIMEOUT,
        }
    }

    pub fn with_spawn_timeout(mut self, timeout: Duration) -> Self {
        self.spawn_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the worker and initialize its module
    ///
    /// A worker whose init fails is terminated before the error is returned.
    pub async fn start(&self) -> Result<WorkerEndpoint, AnalysisError> {
        let options = SpawnOptions::new(&self.name, WorkerId(0)).with_timeout(self.spawn_timeout);
        let endpoint = WorkerEndpoint::spawn(Arc::clone(&self.entry), options).await?;

        if let Err(err) = endpoint.init().await {
            warn!(worker = %self.name, error = %err, "One-shot worker failed to initialize");
            endpoint.terminate().await;
            return Err(err.into());
        }
        Ok(endpoint)
    }

    pub async fn stop(&self, endpoint: Arc<WorkerEndpoint>) {
        endpoint.terminate().await;
    }
}

impl std::fmt::Debug for OneShotWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneShotWorker")
            .field("name", &self.name)
            .field("module", &self.entry.name())
            .field("spawn_timeout", &self.spawn_timeout)
            .finish()
    }
}

/// Lifecycle running one request/response call on a fresh worker
pub(crate) struct CallJob {
    pub(crate) worker: OneShotWorker,
    pub(crate) function: &'static str,
    pub(crate) args: Payload,
}

#[async_trait]
impl Lifecycle for CallJob {
    type Handle = WorkerEndpoint;
    type Output = Payload;
    type Error = AnalysisError;

    async fn start(&self) -> Result<WorkerEndpoint, AnalysisError> {
        self.worker.start().await
    }

    async fn run(&self, endpoint: &WorkerEndpoint) -> Result<Payload, AnalysisError> {
        Ok(endpoint.call(self.function, self.args.clone()).await?)
    }

    async fn stop(&self, endpoint: Arc<WorkerEndpoint>) -> Result<(), AnalysisError> {
        self.worker.stop(endpoint).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::NucleotideModuleEntry;
    use crate::qc::QcConfig;
    use cladeworks_workers::error::StartError;
    use cladeworks_workers::{LoadError, ManagedLifecycle};

    #[tokio::test]
    async fn test_start_fails_on_bad_reference() {
        let entry = NucleotideModuleEntry::new("", QcConfig::default()).shared();
        let err = OneShotWorker::new(entry, "test").start().await.unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Start(StartError::Init(LoadError::Module(_)))
        ));
    }

    #[tokio::test]
    async fn test_call_job_unknown_function() {
        let entry = NucleotideModuleEntry::new(">r\nACGT\n", QcConfig::default()).shared();
        let lifecycle = ManagedLifecycle::new(
            "call",
            CallJob {
                worker: OneShotWorker::new(entry, "test"),
                function: "alignSequences",
                args: Payload::Empty,
            },
        );

        let err = lifecycle.start().await.unwrap().unwrap_err();
        assert!(matches!(err, AnalysisError::Call(_)));
        assert!(!lifecycle.is_running());
    }
}
