// Results serializer worker

use cladeworks_workers::ManagedLifecycle;

use super::oneshot::{CallJob, OneShotWorker};
use crate::error::AnalysisError;
use crate::module::functions;
use crate::types::{text_payload, to_payload, AnalysisResult, Delimiter, SerializeRequest};

/// Renders analysis results as a delimited table on a one-shot worker
pub struct ResultsSerializer {
    lifecycle: ManagedLifecycle<CallJob>,
}

impl ResultsSerializer {
    pub fn new(
        worker: OneShotWorker,
        results: Vec<AnalysisResult>,
        delimiter: Delimiter,
    ) -> Result<Self, AnalysisError> {
        let args = to_payload(&SerializeRequest { results, delimiter })?;
        let job = CallJob {
            worker,
            function: functions::SERIALIZE_RESULTS,
            args,
        };
        Ok(Self {
            lifecycle: ManagedLifecycle::new("results-serializer", job),
        })
    }

    /// `None` if serialization is already in flight
    ///
    /// A non-text reply is a [`AnalysisError::Decode`] error.
    pub async fn run(&self) -> Option<Result<String, AnalysisError>> {
        let outcome = self.lifecycle.start().await?;
        Some(outcome.and_then(|payload| text_payload(payload).map_err(AnalysisError::from)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::analyze;
    use crate::module::NucleotideModuleEntry;
    use crate::qc::QcConfig;
    use crate::types::SequenceRecord;

    #[tokio::test]
    async fn test_serializer_renders_table() {
        let qc = QcConfig::default();
        let results = vec![analyze(
            "ACGT",
            &SequenceRecord {
                index: 0,
                name: "q".into(),
                sequence: "ACGA".into(),
            },
            &qc,
        )];
        let entry = NucleotideModuleEntry::new(">r\nACGT\n", qc).shared();
        let worker = OneShotWorker::new(entry, "ser");

        let table = ResultsSerializer::new(worker, results, Delimiter::Tab)
            .unwrap()
            .run()
            .await
            .unwrap()
            .unwrap();

        let rows: Vec<_> = table.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[1].starts_with("0\tq\tgood"));
        assert!(rows[1].contains("T4A"));
    }
}
