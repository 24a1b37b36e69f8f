// Run command - analyze sequences against a reference

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use cladeworks_analysis::{
    AnalysisInputs, AnalysisLauncher, AnalysisOutcome, Delimiter, LauncherConfig,
};
use serde::Serialize;
use tracing::info;

use super::config::PoolArgs;
use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Reference sequence (FASTA, first record is used)
    #[arg(long, short)]
    pub reference: PathBuf,

    /// Sequences to analyze (FASTA)
    #[arg(long, short)]
    pub input: PathBuf,

    /// Reference tree (JSON) to attach results to
    #[arg(long)]
    pub tree: Option<PathBuf>,

    /// Where to write the finalized tree (requires --tree)
    #[arg(long, requires = "tree")]
    pub tree_output: Option<PathBuf>,

    /// Where to write the results table (default: stdout)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Column delimiter: tab, comma or semicolon
    #[arg(long, default_value = "tab")]
    pub delimiter: Delimiter,

    #[command(flatten)]
    pub pool: PoolArgs,
}

/// Machine-readable run summary
#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    records: usize,
    succeeded: usize,
    failed: Vec<FailedRecord<'a>>,
    table: Option<&'a Path>,
    tree: Option<&'a Path>,
}

#[derive(Debug, Serialize)]
struct FailedRecord<'a> {
    index: usize,
    name: &'a str,
    error: String,
}

fn read(path: &Path, what: &str) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {what} {}", path.display()))
}

pub async fn run(args: RunArgs, output: OutputFormat, quiet: bool) -> Result<()> {
    let reference = read(&args.reference, "reference")?;
    let sequences = read(&args.input, "input")?;

    let mut inputs = AnalysisInputs::new(reference, sequences);
    if let Some(path) = &args.tree {
        let tree = serde_json::from_str(&read(path, "tree")?)
            .with_context(|| format!("tree {} is not valid JSON", path.display()))?;
        inputs = inputs.with_tree(tree);
    }

    let config = LauncherConfig::default()
        .with_pool(args.pool.to_config()?)
        .with_delimiter(args.delimiter);
    let launcher = AnalysisLauncher::new(config);

    let mut progress = launcher.progress();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = *progress.borrow_and_update();
            if !quiet {
                eprint!("\ranalyzed {}/{} ({} failed)", p.finished(), p.submitted, p.failed);
            }
        }
    });

    let outcome = launcher.run(inputs).await.context("analysis run failed");
    drop(launcher);
    let _ = reporter.await;
    if !quiet {
        eprintln!();
    }
    let outcome = outcome?;

    write_outputs(&args, &outcome)?;
    report(&args, &outcome, output)?;

    if outcome.results().count() == 0 && !outcome.records.is_empty() {
        bail!("every record failed analysis");
    }
    Ok(())
}

fn write_outputs(args: &RunArgs, outcome: &AnalysisOutcome) -> Result<()> {
    match &args.output {
        Some(path) => {
            fs::write(path, &outcome.table)
                .with_context(|| format!("failed to write results to {}", path.display()))?;
            info!(path = %path.display(), "Results written");
        }
        None => print!("{}", outcome.table),
    }

    if let (Some(path), Some(tree)) = (&args.tree_output, &outcome.tree) {
        let json = serde_json::to_string_pretty(tree)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write tree to {}", path.display()))?;
        info!(path = %path.display(), "Tree written");
    }
    Ok(())
}

fn report(args: &RunArgs, outcome: &AnalysisOutcome, output: OutputFormat) -> Result<()> {
    let failed: Vec<FailedRecord<'_>> = outcome
        .failures()
        .map(|r| FailedRecord {
            index: r.index,
            name: &r.name,
            error: r
                .result
                .as_ref()
                .err()
                .map(ToString::to_string)
                .unwrap_or_default(),
        })
        .collect();

    if !output.is_text() {
        return output.print_value(&RunSummary {
            records: outcome.records.len(),
            succeeded: outcome.results().count(),
            failed,
            table: args.output.as_deref(),
            tree: args.tree_output.as_deref(),
        });
    }

    // Text summary only when the table went to a file, to keep stdout clean
    if args.output.is_none() {
        return Ok(());
    }
    print_field("Records", &outcome.records.len().to_string());
    print_field("Succeeded", &outcome.results().count().to_string());
    if !failed.is_empty() {
        print_table_header(&[("INDEX", 6), ("NAME", 24), ("ERROR", 50)]);
        for record in &failed {
            print_table_row(&[
                (&record.index.to_string(), 6),
                (record.name, 24),
                (&record.error, 50),
            ]);
        }
    }
    Ok(())
}
