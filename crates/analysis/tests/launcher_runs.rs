//! Full launcher runs against the bundled nucleotide module

use std::time::Duration;

use cladeworks_analysis::{
    AnalysisError, AnalysisInputs, AnalysisLauncher, BackoffConfig, Delimiter, LauncherConfig,
    QcStatus,
};
use cladeworks_workers::{PoolConfig, PoolError};
use serde_json::json;

const REFERENCE: &str = ">ref\nACGTACGTACGTACGTACGT\n";

fn sequences(count: usize) -> String {
    (0..count)
        .map(|i| {
            let seq = if i % 3 == 0 {
                "ACGTACGTACGTACGTACGT".to_string()
            } else {
                format!("ACGTACGTACGTACGTAC{}", if i % 2 == 0 { "GG" } else { "NN" })
            };
            format!(">seq{i}\n{seq}\n")
        })
        .collect()
}

fn launcher(pool: PoolConfig) -> AnalysisLauncher {
    AnalysisLauncher::new(LauncherConfig::default().with_pool(pool))
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_run_reports_every_record_in_input_order() {
    let launcher = launcher(PoolConfig::new("it").with_size(3));
    let outcome = launcher
        .run(AnalysisInputs::new(REFERENCE, sequences(12)))
        .await
        .unwrap();

    assert_eq!(outcome.records.len(), 12);
    for (i, record) in outcome.records.iter().enumerate() {
        assert_eq!(record.index, i);
        assert_eq!(record.name, format!("seq{i}"));
    }
    assert_eq!(outcome.results().count(), 12);
    assert_eq!(outcome.failures().count(), 0);

    let first = outcome.records[0].result.as_ref().unwrap();
    assert!(first.substitutions.is_empty());
    assert_eq!(first.qc_status, QcStatus::Good);

    assert_eq!(outcome.progress.submitted, 12);
    assert_eq!(outcome.progress.completed, 12);
    assert_eq!(outcome.table.lines().count(), 13);
    assert!(outcome.tree.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_saturated_pool_backs_off_instead_of_dropping() {
    let pool = PoolConfig::new("tight").with_size(1).with_max_queued_jobs(1);
    let config = LauncherConfig::default()
        .with_pool(pool)
        .with_backoff(
            BackoffConfig::default()
                .with_min_interval(Duration::from_millis(1))
                .with_max_interval(Duration::from_millis(5)),
        );

    let outcome = AnalysisLauncher::new(config)
        .run(AnalysisInputs::new(REFERENCE, sequences(40)))
        .await
        .unwrap();

    assert_eq!(outcome.results().count(), 40);
    assert_eq!(outcome.progress.completed, 40);
}

#[tokio::test]
async fn test_tree_and_delimiter() {
    let config = LauncherConfig::default()
        .with_pool(PoolConfig::new("it").with_size(2))
        .with_delimiter(Delimiter::Semicolon);
    let inputs = AnalysisInputs::new(REFERENCE, sequences(3))
        .with_tree(json!({"name": "root", "children": []}));

    let outcome = AnalysisLauncher::new(config).run(inputs).await.unwrap();

    let tree = outcome.tree.unwrap();
    assert_eq!(tree["children"].as_array().unwrap().len(), 3);
    assert!(outcome.table.starts_with("index;seqName;"));
}

#[tokio::test]
async fn test_invalid_reference_aborts_run() {
    let err = launcher(PoolConfig::new("it").with_size(2))
        .run(AnalysisInputs::new(">ref\n\n", sequences(2)))
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::InvalidReference(_)));
}

#[tokio::test]
async fn test_invalid_pool_config_aborts_run() {
    let pool = PoolConfig {
        size: 0,
        ..PoolConfig::new("it")
    };
    let err = launcher(pool)
        .run(AnalysisInputs::new(REFERENCE, sequences(2)))
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::Pool(PoolError::Config(_))));
}

#[tokio::test]
async fn test_malformed_sequences_abort_run() {
    let err = launcher(PoolConfig::new("it").with_size(1))
        .run(AnalysisInputs::new(REFERENCE, "ACGT\n>late\nACGT\n"))
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::Stream(_)));
}

#[tokio::test]
async fn test_empty_input_produces_header_only() {
    let outcome = launcher(PoolConfig::new("it").with_size(1))
        .run(AnalysisInputs::new(REFERENCE, ""))
        .await
        .unwrap();

    assert!(outcome.records.is_empty());
    assert_eq!(outcome.table.lines().count(), 1);
}
