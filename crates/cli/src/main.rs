// Cladeworks CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Pool flags fall back to CLADEWORKS_* env vars (also loadable from .env).
// Design Decision: Logs go to stderr so the results table can be piped from stdout.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use cladeworks_workers::telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "cladeworks")]
#[command(about = "Cladeworks - analyze nucleotide sequences on a pool of workers")]
#[command(version)]
pub struct Cli {
    /// Output format for summaries
    #[arg(long, short, default_value = "text", value_parser = ["text", "json"])]
    pub format: String,

    /// Suppress progress output
    #[arg(long, short)]
    pub quiet: bool,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze sequences against a reference
    Run(commands::run::RunArgs),

    /// Show the effective pool configuration
    Config {
        #[command(flatten)]
        pool: commands::config::PoolArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::from_env();
    if telemetry.log_filter.is_none() {
        telemetry = telemetry.with_log_filter(if cli.verbose { "debug" } else { "warn" });
    }
    let _telemetry = init_telemetry(telemetry)?;

    let output_format = output::OutputFormat::parse(&cli.format);

    match cli.command {
        Commands::Run(args) => commands::run::run(args, output_format, cli.quiet).await,
        Commands::Config { pool } => commands::config::run(&pool, output_format),
    }
}
