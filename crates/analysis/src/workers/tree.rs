// Tree finalizer worker

use cladeworks_workers::ManagedLifecycle;
use serde_json::Value;

use super::oneshot::{CallJob, OneShotWorker};
use crate::error::AnalysisError;
use crate::module::functions;
use crate::types::{from_payload, to_payload, AnalysisResult, FinalizeRequest};

/// Attaches analysis results to a reference tree on a one-shot worker
pub struct TreeFinalizer {
    lifecycle: ManagedLifecycle<CallJob>,
}

impl TreeFinalizer {
    pub fn new(
        worker: OneShotWorker,
        tree: Value,
        results: Vec<AnalysisResult>,
    ) -> Result<Self, AnalysisError> {
        let args = to_payload(&FinalizeRequest { tree, results })?;
        let job = CallJob {
            worker,
            function: functions::FINALIZE_TREE,
            args,
        };
        Ok(Self {
            lifecycle: ManagedLifecycle::new("tree-finalizer", job),
        })
    }

    /// `None` if finalization is already in flight
    pub async fn run(&self) -> Option<Result<Value, AnalysisError>> {
        let outcome = self.lifecycle.start().await?;
        Some(outcome.and_then(|payload| Ok(from_payload(&payload)?)))
    }

    /// Tear down a finalization in progress
    pub async fn stop(&self) -> Result<(), AnalysisError> {
        self.lifecycle.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::NucleotideModuleEntry;
    use crate::qc::QcConfig;
    use crate::types::QcStatus;
    use serde_json::json;

    fn worker() -> OneShotWorker {
        OneShotWorker::new(
            NucleotideModuleEntry::new(">ref\nACGT\n", QcConfig::default()).shared(),
            "tree",
        )
    }

    fn result(name: &str) -> AnalysisResult {
        AnalysisResult {
            index: 0,
            name: name.into(),
            substitutions: Vec::new(),
            missing: 0,
            gc_content: 0.5,
            length_difference: 0,
            qc_score: 0.0,
            qc_status: QcStatus::Good,
        }
    }

    #[tokio::test]
    async fn test_finalize_attaches_results() {
        let finalizer =
            TreeFinalizer::new(worker(), json!({"name": "root"}), vec![result("q1")]).unwrap();

        let tree = finalizer.run().await.unwrap().unwrap();
        assert_eq!(tree["children"][0]["name"], "q1");
        assert_eq!(tree["children"][0]["nodeAttrs"]["qcStatus"], "good");
    }

    #[tokio::test]
    async fn test_finalize_rejects_non_object_tree() {
        let finalizer = TreeFinalizer::new(worker(), json!("leaf"), vec![result("q1")]).unwrap();

        let err = finalizer.run().await.unwrap().unwrap_err();
        assert!(matches!(err, AnalysisError::Call(_)));
        finalizer.stop().await.unwrap();
    }
}
