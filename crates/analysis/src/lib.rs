//! # Cladeworks Analysis
//!
//! A concrete computation backend for the worker substrate plus the typed
//! workers and launcher that drive it.
//!
//! - [`module`]: `NucleotideModule`, loaded once per worker thread
//! - [`workers`]: one typed wrapper per module operation
//! - [`launcher`]: parse → analyze → finalize → serialize in one call
//!
//! ## Example
//!
//! ```ignore
//! use cladeworks_analysis::{AnalysisInputs, AnalysisLauncher, LauncherConfig};
//!
//! let launcher = AnalysisLauncher::new(LauncherConfig::from_env());
//! let outcome = launcher.run(AnalysisInputs::new(reference, sequences)).await?;
//! println!("{}", outcome.table);
//! ```

pub mod compute;
pub mod error;
pub mod fasta;
pub mod launcher;
pub mod module;
pub mod progress;
pub mod qc;
pub mod types;
pub mod workers;

pub use error::AnalysisError;
pub use fasta::{FastaError, FastaReader};
pub use launcher::{
    AnalysisInputs, AnalysisLauncher, AnalysisOutcome, BackoffConfig, LauncherConfig,
    RecordOutcome,
};
pub use module::{functions, load_reference, NucleotideModule, NucleotideModuleEntry};
pub use progress::{Progress, ProgressNotifier};
pub use qc::QcConfig;
pub use types::{
    AnalysisResult, Delimiter, FinalizeRequest, QcStatus, SequenceRecord, SerializeRequest,
    Substitution,
};
pub use workers::{
    AnalysisPool, AnalysisTask, OneShotWorker, ResultsSerializer, SequenceParser, TreeFinalizer,
};
