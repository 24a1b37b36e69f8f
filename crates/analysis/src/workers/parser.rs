// Sequence parser worker
//
// One-shot worker streaming `parseSequencesStreaming`. Records are forwarded
// to an unbounded channel as the module produces them, so analysis can start
// before the whole input is parsed.

use std::sync::Arc;

use async_trait::async_trait;
use cladeworks_workers::{Lifecycle, ManagedLifecycle, Payload, WorkerEndpoint};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::oneshot::OneShotWorker;
use crate::error::AnalysisError;
use crate::module::functions;
use crate::types::{from_payload, SequenceRecord};

struct ParseJob {
    worker: OneShotWorker,
    fasta: Payload,
    records: mpsc::UnboundedSender<SequenceRecord>,
    /// Replaced at every start so an earlier cancel does not leak into the next parse
    cancel: Arc<Mutex<CancellationToken>>,
}

#[async_trait]
impl Lifecycle for ParseJob {
    type Handle = WorkerEndpoint;
    type Output = usize;
    type Error = AnalysisError;

    async fn start(&self) -> Result<WorkerEndpoint, AnalysisError> {
        *self.cancel.lock() = CancellationToken::new();
        self.worker.start().await
    }

    async fn run(&self, endpoint: &WorkerEndpoint) -> Result<usize, AnalysisError> {
        let cancel = self.cancel.lock().clone();
        let mut stream = endpoint.stream(functions::PARSE_SEQUENCES_STREAMING, self.fasta.clone())?;
        let mut parsed = 0;

        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(parsed, "Sequence parsing cancelled");
                    stream.cancel();
                    break;
                }
                item = stream.next() => item,
            };

            let Some(item) = item else { break };
            let record: SequenceRecord = from_payload(&item?)?;
            if self.records.send(record).is_err() {
                debug!(parsed, "Record receiver dropped, stopping parser");
                stream.cancel();
                break;
            }
            parsed += 1;
        }

        info!(parsed, "Sequence parsing finished");
        Ok(parsed)
    }

    async fn stop(&self, endpoint: Arc<WorkerEndpoint>) -> Result<(), AnalysisError> {
        self.worker.stop(endpoint).await;
        Ok(())
    }
}

/// Streams parsed records out of a FASTA input
///
/// # Example
///
/// ```ignore
/// let (parser, mut records) = SequenceParser::new(OneShotWorker::new(entry, "parser"), fasta);
/// let parsing = parser.run();
/// while let Some(record) = records.recv().await { /* ... */ }
/// ```
pub struct SequenceParser {
    lifecycle: ManagedLifecycle<ParseJob>,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl SequenceParser {
    pub fn new(
        worker: OneShotWorker,
        fasta: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SequenceRecord>) {
        let (records, rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(Mutex::new(CancellationToken::new()));
        let job = ParseJob {
            worker,
            fasta: Payload::Text(fasta.into()),
            records,
            cancel: Arc::clone(&cancel),
        };
        let parser = Self {
            lifecycle: ManagedLifecycle::new("sequence-parser", job),
            cancel,
        };
        (parser, rx)
    }

    /// Parse the whole input, returning the number of forwarded records
    ///
    /// `None` if a parse is already in flight.
    pub async fn run(&self) -> Option<Result<usize, AnalysisError>> {
        self.lifecycle.start().await
    }

    /// Ask the running parse to stop after the current record
    ///
    /// Only affects the parse in flight; a later `run` starts afresh.
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}
