//! Typed workers, one per module operation
//!
//! | Worker | Shape | Operation |
//! |---|---|---|
//! | [`AnalysisPool`] | pool | `runAnalysis` |
//! | [`SequenceParser`] | one-shot stream | `parseSequencesStreaming` |
//! | [`TreeFinalizer`] | one-shot call | `finalizeTree` |
//! | [`ResultsSerializer`] | one-shot call | `serializeResults` |
//!
//! One-shot workers run under a `ManagedLifecycle`, so a repeated start while
//! one is in flight is ignored.

mod analysis;
mod oneshot;
mod parser;
mod serializer;
mod tree;

pub use analysis::{AnalysisPool, AnalysisTask};
pub use oneshot::OneShotWorker;
pub use parser::SequenceParser;
pub use serializer::ResultsSerializer;
pub use tree::TreeFinalizer;
