//! Errors for the analysis layer

use cladeworks_workers::error::StartError;
use cladeworks_workers::{CallError, LoadError, PoolError, SpawnError, StreamError, TaskError};

use crate::fasta::FastaError;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("analysis task failed: {0}")]
    Task(#[from] TaskError),

    #[error(transparent)]
    Start(#[from] StartError),

    #[error("worker call failed: {0}")]
    Call(#[from] CallError),

    #[error("sequence stream failed: {0}")]
    Stream(#[from] StreamError),

    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed sequences: {0}")]
    Fasta(#[from] FastaError),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("invalid QC configuration: {0}")]
    QcConfig(String),

    /// A one-shot worker was started while already starting or running
    #[error("{0} is already running")]
    AlreadyRunning(String),
}

impl From<SpawnError> for AnalysisError {
    fn from(err: SpawnError) -> Self {
        Self::Start(StartError::Spawn(err))
    }
}

impl From<LoadError> for AnalysisError {
    fn from(err: LoadError) -> Self {
        Self::Start(StartError::Init(err))
    }
}

impl AnalysisError {
    /// Whether the pool rejected a task only because its queue is full
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::Pool(PoolError::Backpressure { .. }))
    }
}
