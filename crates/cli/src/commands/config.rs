// Pool configuration flags and the `config` command

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use cladeworks_workers::config::{
    ENV_CONCURRENCY_PER_WORKER, ENV_MAX_QUEUED_JOBS, ENV_POOL_NAME, ENV_POOL_SIZE,
    ENV_SPAWN_TIMEOUT_MS,
};
use cladeworks_workers::PoolConfig;

use crate::output::{print_field, OutputFormat};

/// Wait queue limit as given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueLimit {
    Unbounded,
    Limit(usize),
}

impl FromStr for QueueLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("unbounded") {
            return Ok(Self::Unbounded);
        }
        s.parse()
            .map(Self::Limit)
            .map_err(|_| format!("expected a number or 'unbounded', got '{s}'"))
    }
}

/// Pool flags; each falls back to its environment variable, then the default
#[derive(Debug, Clone, Default, Args)]
pub struct PoolArgs {
    /// Pool name (thread names and logs)
    #[arg(long, env = ENV_POOL_NAME)]
    pub pool_name: Option<String>,

    /// Number of analysis workers
    #[arg(long, env = ENV_POOL_SIZE)]
    pub pool_size: Option<usize>,

    /// In-flight tasks per worker
    #[arg(long, env = ENV_CONCURRENCY_PER_WORKER)]
    pub concurrency_per_worker: Option<usize>,

    /// Worker spawn handshake timeout in milliseconds
    #[arg(long, env = ENV_SPAWN_TIMEOUT_MS)]
    pub spawn_timeout_ms: Option<u64>,

    /// Maximum tasks waiting for a worker, or "unbounded"
    #[arg(long, env = ENV_MAX_QUEUED_JOBS)]
    pub max_queued_jobs: Option<QueueLimit>,
}

impl PoolArgs {
    /// Build and validate the effective pool configuration
    pub fn to_config(&self) -> Result<PoolConfig> {
        let mut config = PoolConfig::default();
        if let Some(name) = &self.pool_name {
            config = config.with_name(name.clone());
        }
        if let Some(size) = self.pool_size {
            config.size = size;
        }
        if let Some(concurrency) = self.concurrency_per_worker {
            config.concurrency_per_worker = concurrency;
        }
        if let Some(ms) = self.spawn_timeout_ms {
            config.spawn_timeout = Duration::from_millis(ms);
        }
        match self.max_queued_jobs {
            Some(QueueLimit::Unbounded) => config.max_queued_jobs = None,
            Some(QueueLimit::Limit(limit)) => config.max_queued_jobs = Some(limit),
            None => {}
        }

        config
            .validate()
            .context("invalid pool configuration")?;
        Ok(config)
    }
}

pub fn run(args: &PoolArgs, output: OutputFormat) -> Result<()> {
    let config = args.to_config()?;

    if output.is_text() {
        print_field("Pool", &config.name);
        print_field("Workers", &config.size.to_string());
        print_field("Per-worker", &config.concurrency_per_worker.to_string());
        print_field(
            "Queue limit",
            &config
                .max_queued_jobs
                .map_or_else(|| "unbounded".to_string(), |n| n.to_string()),
        );
        print_field(
            "Spawn timeout",
            &format!("{}ms", config.spawn_timeout.as_millis()),
        );
        Ok(())
    } else {
        output.print_value(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_limit_parsing() {
        assert_eq!("unbounded".parse(), Ok(QueueLimit::Unbounded));
        assert_eq!("UNBOUNDED".parse(), Ok(QueueLimit::Unbounded));
        assert_eq!("8".parse(), Ok(QueueLimit::Limit(8)));
        assert!("many".parse::<QueueLimit>().is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = PoolArgs {
            pool_size: Some(2),
            spawn_timeout_ms: Some(250),
            max_queued_jobs: Some(QueueLimit::Limit(3)),
            ..Default::default()
        };
        let config = args.to_config().unwrap();
        assert_eq!(config.size, 2);
        assert_eq!(config.spawn_timeout, Duration::from_millis(250));
        assert_eq!(config.max_queued_jobs, Some(3));
        assert_eq!(config.concurrency_per_worker, 1);
    }

    #[test]
    fn test_zero_pool_size_is_rejected() {
        let args = PoolArgs {
            pool_size: Some(0),
            ..Default::default()
        };
        assert!(args.to_config().is_err());
    }
}
