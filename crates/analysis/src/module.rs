// Nucleotide computation module
//
// Loaded once per worker thread. `initialize` parses the reference sequence;
// every other operation needs it, and the worker refuses calls until init has
// succeeded.

use std::sync::Arc;

use cladeworks_workers::{ComputationModule, ModuleEntry, ModuleError, Payload, StreamCallbacks};
use tracing::debug;

use crate::compute::{analyze, attach_results, serialize_table};
use crate::error::AnalysisError;
use crate::fasta::{self, FastaError};
use crate::qc::QcConfig;
use crate::types::{
    from_payload, text_payload, to_payload, FinalizeRequest, SequenceRecord, SerializeRequest,
};

/// Function names understood by [`NucleotideModule`]
pub mod functions {
    pub const PARSE_SEQUENCES_STREAMING: &str = "parseSequencesStreaming";
    pub const RUN_ANALYSIS: &str = "runAnalysis";
    pub const SERIALIZE_RESULTS: &str = "serializeResults";
    pub const FINALIZE_TREE: &str = "finalizeTree";
}

impl From<FastaError> for ModuleError {
    fn from(err: FastaError) -> Self {
        ModuleError::new(err.to_string()).with_kind("fasta")
    }
}

/// First record of `fasta`, which must be well-formed and non-empty
pub fn load_reference(fasta: &str) -> Result<SequenceRecord, AnalysisError> {
    let record = fasta::parse_str(fasta)
        .next()
        .ok_or_else(|| AnalysisError::InvalidReference("no sequence found".to_string()))?
        .map_err(|err| AnalysisError::InvalidReference(err.to_string()))?;
    if record.sequence.is_empty() {
        return Err(AnalysisError::InvalidReference(format!(
            "'{}' is empty",
            record.name
        )));
    }
    Ok(record)
}

/// Entry point loading a [`NucleotideModule`] on each worker
#[derive(Debug, Clone)]
pub struct NucleotideModuleEntry {
    reference_fasta: Arc<str>,
    qc: QcConfig,
}

impl NucleotideModuleEntry {
    /// `reference_fasta` must hold at least one record; the first one is used
    pub fn new(reference_fasta: impl Into<Arc<str>>, qc: QcConfig) -> Self {
        Self {
            reference_fasta: reference_fasta.into(),
            qc,
        }
    }

    pub fn shared(self) -> Arc<dyn ModuleEntry> {
        Arc::new(self)
    }
}

impl ModuleEntry for NucleotideModuleEntry {
    fn name(&self) -> &str {
        "nucleotide"
    }

    fn load(&self) -> Result<Box<dyn ComputationModule>, ModuleError> {
        Ok(Box::new(NucleotideModule {
            reference_fasta: Arc::clone(&self.reference_fasta),
            qc: self.qc.clone(),
            reference: String::new(),
        }))
    }
}

pub struct NucleotideModule {
    reference_fasta: Arc<str>,
    qc: QcConfig,
    reference: String,
}

impl ComputationModule for NucleotideModule {
    fn initialize(&mut self) -> Result<(), ModuleError> {
        let record = load_reference(&self.reference_fasta)
            .map_err(|err| ModuleError::new(err.to_string()).with_kind("reference"))?;

        debug!(reference = %record.name, length = record.sequence.len(), "Reference loaded");
        self.reference = record.sequence;
        Ok(())
    }

    fn call(&mut self, function: &str, args: Payload) -> Result<Payload, ModuleError> {
        match function {
            functions::RUN_ANALYSIS => {
                let record: SequenceRecord = from_payload(&args)?;
                let result = analyze(&self.reference, &record, &self.qc);
                Ok(to_payload(&result)?)
            }
            functions::SERIALIZE_RESULTS => {
                let request: SerializeRequest = from_payload(&args)?;
                Ok(Payload::Text(serialize_table(&request.results, request.delimiter)))
            }
            functions::FINALIZE_TREE => {
                let request: FinalizeRequest = from_payload(&args)?;
                let tree = attach_results(request.tree, &request.results).ok_or_else(|| {
                    ModuleError::new("tree root must be an object with a 'children' array")
                        .with_kind("tree")
                })?;
                Ok(to_payload(&tree)?)
            }
            other => Err(ModuleError::unknown_function(other)),
        }
    }

    fn stream(
        &mut self,
        function: &str,
        args: Payload,
        callbacks: &StreamCallbacks,
    ) -> Result<(), ModuleError> {
        if function != functions::PARSE_SEQUENCES_STREAMING {
            return Err(ModuleError::unknown_function(function));
        }

        let input = text_payload(args)?;
        for record in fasta::parse_str(&input) {
            let payload = to_payload(&record?)?;
            if !callbacks.on_item(payload) {
                debug!("Sequence parsing cancelled by consumer");
                return Ok(());
            }
        }
        callbacks.on_complete();
        Ok(())
    }
}
