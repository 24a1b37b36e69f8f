//! End-to-end analysis run
//!
//! ```text
//!  sequences ──► SequenceParser ──records──► AnalysisPool ──results──┐
//!  (one-shot stream)       (mpsc)            (runAnalysis × N)        │
//!                                                 │ events            ▼
//!                                                 ▼            TreeFinalizer ┐
//!                                          ProgressNotifier    ResultsSerializer ┘─► outcome
//! ```
//!
//! Records are queued as soon as the parser emits them. When the pool's wait
//! queue is full the launcher backs off and retries instead of dropping the
//! record. A failure to bring the pool up aborts the run; failures of single
//! records are reported per record.

use std::sync::Arc;
use std::time::Duration;

use cladeworks_workers::{ModuleEntry, PoolConfig, PoolError};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::error::AnalysisError;
use crate::module::{load_reference, NucleotideModuleEntry};
use crate::progress::{Progress, ProgressNotifier};
use crate::qc::QcConfig;
use crate::types::{AnalysisResult, Delimiter, SequenceRecord};
use crate::workers::{
    AnalysisPool, AnalysisTask, OneShotWorker, ResultsSerializer, SequenceParser, TreeFinalizer,
};

/// Retry pacing for saturated pools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First wait after a rejected submission
    #[serde(with = "cladeworks_workers::config::duration_millis")]
    pub min_interval: Duration,

    /// Upper bound for the wait
    #[serde(with = "cladeworks_workers::config::duration_millis")]
    pub max_interval: Duration,

    /// Growth factor between consecutive rejections
    pub backoff_multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Interval following `current`
    pub fn next(&self, current: Duration) -> Duration {
        Duration::from_secs_f64(current.as_secs_f64() * self.backoff_multiplier)
            .min(self.max_interval)
    }
}

/// Launcher configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LauncherConfig {
    pub pool: PoolConfig,
    pub qc: QcConfig,
    pub backoff: BackoffConfig,
    pub delimiter: Delimiter,
}

impl LauncherConfig {
    /// Pool settings from the environment, everything else default
    pub fn from_env() -> Self {
        Self {
            pool: PoolConfig::from_env(),
            ..Default::default()
        }
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_qc(mut self, qc: QcConfig) -> Self {
        self.qc = qc;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_delimiter(mut self, delimiter: Delimiter) -> Self {
        self.delimiter = delimiter;
        self
    }
}

/// Inputs of one run, all as text
#[derive(Debug, Clone)]
pub struct AnalysisInputs {
    /// FASTA; the first record is the reference
    pub reference: String,
    /// FASTA with the sequences to analyze
    pub sequences: String,
    /// Reference tree to attach results to
    pub tree: Option<Value>,
}

impl AnalysisInputs {
    pub fn new(reference: impl Into<String>, sequences: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            sequences: sequences.into(),
            tree: None,
        }
    }

    pub fn with_tree(mut self, tree: Value) -> Self {
        self.tree = Some(tree);
        self
    }
}

/// Result for one input record
#[derive(Debug)]
pub struct RecordOutcome {
    pub index: usize,
    pub name: String,
    pub result: Result<AnalysisResult, AnalysisError>,
}

/// Everything a run produced
#[derive(Debug)]
pub struct AnalysisOutcome {
    /// One entry per parsed record, in input order
    pub records: Vec<RecordOutcome>,
    /// Successful results as a delimited table
    pub table: String,
    /// Reference tree with results attached, if a tree was given
    pub tree: Option<Value>,
    pub progress: Progress,
}

impl AnalysisOutcome {
    pub fn results(&self) -> impl Iterator<Item = &AnalysisResult> {
        self.records.iter().filter_map(|r| r.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecordOutcome> {
        self.records.iter().filter(|r| r.result.is_err())
    }
}

/// Runs parse → analyze → finalize → serialize
pub struct AnalysisLauncher {
    config: LauncherConfig,
    progress: Arc<ProgressNotifier>,
}

impl AnalysisLauncher {
    pub fn new(config: LauncherConfig) -> Self {
        Self {
            config,
            progress: Arc::new(ProgressNotifier::new()),
        }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Watch progress of the current (or next) run
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    #[instrument(skip(self, inputs), fields(pool = %self.config.pool.name))]
    pub async fn run(&self, inputs: AnalysisInputs) -> Result<AnalysisOutcome, AnalysisError> {
        self.config.qc.validate()?;
        let reference = load_reference(&inputs.reference)?;
        debug!(
            reference = %reference.name,
            length = reference.sequence.len(),
            "Reference accepted"
        );
        let entry = NucleotideModuleEntry::new(inputs.reference, self.config.qc.clone()).shared();

        let pool = AnalysisPool::create(Arc::clone(&entry), self.config.pool.clone()).await?;
        self.progress.reset();
        let dispatcher = pool.wire(self.progress.clone());
        info!(workers = pool.stats().workers, "Analysis pool ready");

        let collected = self.analyze_all(&pool, &entry, inputs.sequences).await;

        pool.terminate().await;
        let dispatched = dispatcher.join().await;
        if dispatched.missed > 0 {
            warn!(missed = dispatched.missed, "Progress missed some pool events");
        }
        let records = collected?;

        let results: Vec<AnalysisResult> = records
            .iter()
            .filter_map(|r| r.result.as_ref().ok().cloned())
            .collect();
        let (table, tree) = self.finish(&entry, results, inputs.tree).await?;

        let progress = self.progress.snapshot();
        info!(
            records = records.len(),
            completed = progress.completed,
            failed = progress.failed,
            "Analysis run finished"
        );
        Ok(AnalysisOutcome {
            records,
            table,
            tree,
            progress,
        })
    }

    fn one_shot(&self, entry: &Arc<dyn ModuleEntry>, name: &str) -> OneShotWorker {
        OneShotWorker::new(Arc::clone(entry), name)
            .with_spawn_timeout(self.config.pool.spawn_timeout)
    }

    /// Parse and queue every record, then wait for all results
    async fn analyze_all(
        &self,
        pool: &AnalysisPool,
        entry: &Arc<dyn ModuleEntry>,
        sequences: String,
    ) -> Result<Vec<RecordOutcome>, AnalysisError> {
        let (parser, mut records) =
            SequenceParser::new(self.one_shot(entry, "sequence-parser"), sequences);

        // The parser owns the record sender; dropping it ends the receive loop.
        // Dropping the receiver stops the parser early.
        let parsing = async move {
            let outcome = parser.run().await;
            drop(parser);
            outcome
        };

        let submitting = async move {
            let mut queued = Vec::new();
            while let Some(record) = records.recv().await {
                let task = match self.submit(pool, &record).await {
                    Err(err) if aborts_run(&err) => return Err(err),
                    task => task,
                };
                queued.push((record, task));
            }
            Ok(queued)
        };

        let (parsed, queued) = tokio::join!(parsing, submitting);
        let queued = queued?;
        let parsed = settle("sequence-parser", parsed)?;
        debug!(parsed, queued = queued.len(), "All records queued");

        let outcomes = queued.into_iter().map(|(record, task)| async move {
            let result = match task {
                Ok(task) => task.result().await,
                Err(err) => Err(err),
            };
            RecordOutcome {
                index: record.index,
                name: record.name,
                result,
            }
        });
        Ok(join_all(outcomes).await)
    }

    /// Queue one record, backing off while the pool is saturated
    async fn submit(
        &self,
        pool: &AnalysisPool,
        record: &SequenceRecord,
    ) -> Result<AnalysisTask, AnalysisError> {
        let backoff = &self.config.backoff;
        let mut delay = backoff.min_interval;
        loop {
            match pool.submit(record) {
                Err(err) if err.is_backpressure() => {
                    debug!(
                        index = record.index,
                        delay_ms = delay.as_millis() as u64,
                        "Pool saturated, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = backoff.next(delay);
                }
                Ok(task) => {
                    self.progress.record_submitted();
                    return Ok(task);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Finalize the tree and serialize the table side by side
    async fn finish(
        &self,
        entry: &Arc<dyn ModuleEntry>,
        results: Vec<AnalysisResult>,
        tree: Option<Value>,
    ) -> Result<(String, Option<Value>), AnalysisError> {
        let serializer = ResultsSerializer::new(
            self.one_shot(entry, "results-serializer"),
            results.clone(),
            self.config.delimiter,
        )?;

        let Some(tree) = tree else {
            let table = settle("results-serializer", serializer.run().await)?;
            return Ok((table, None));
        };

        let finalizer = TreeFinalizer::new(self.one_shot(entry, "tree-finalizer"), tree, results)?;
        let (table, tree) = tokio::join!(serializer.run(), finalizer.run());
        Ok((
            settle("results-serializer", table)?,
            Some(settle("tree-finalizer", tree)?),
        ))
    }
}

/// Errors after which no further record can be analyzed
fn aborts_run(err: &AnalysisError) -> bool {
    matches!(
        err,
        AnalysisError::Pool(PoolError::Terminated(_) | PoolError::NoWorkers(_))
    )
}

fn settle<T>(
    worker: &str,
    outcome: Option<Result<T, AnalysisError>>,
) -> Result<T, AnalysisError> {
    outcome.unwrap_or_else(|| Err(AnalysisError::AlreadyRunning(worker.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_to_cap() {
        let backoff = BackoffConfig::default()
            .with_min_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_millis(300))
            .with_backoff_multiplier(2.0);

        let second = backoff.next(backoff.min_interval);
        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(backoff.next(second), Duration::from_millis(300));
    }

    #[test]
    fn test_backoff_multiplier_is_clamped() {
        let backoff = BackoffConfig::default().with_backoff_multiplier(0.1);
        assert_eq!(backoff.backoff_multiplier, 1.0);
        assert_eq!(backoff.next(Duration::from_millis(50)), Duration::from_millis(50));
    }

    #[test]
    fn test_config_builder() {
        let config = LauncherConfig::default()
            .with_pool(PoolConfig::new("x").with_size(2))
            .with_delimiter(Delimiter::Comma);
        assert_eq!(config.pool.size, 2);
        assert_eq!(config.delimiter, Delimiter::Comma);
    }

    #[test]
    fn test_config_serialization() {
        let json = serde_json::to_value(LauncherConfig::default()).unwrap();
        assert_eq!(json["backoff"]["min_interval"], 10);
        assert_eq!(json["delimiter"], "tab");
    }

    #[test]
    fn test_only_dead_pools_abort() {
        assert!(aborts_run(&AnalysisError::Pool(PoolError::Terminated("p".into()))));
        assert!(!aborts_run(&AnalysisError::InvalidReference("x".into())));
    }
}
