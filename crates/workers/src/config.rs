//! Pool configuration
//!
//! Configuration is immutable for a pool's lifetime. Values come from code
//! (builder methods) or from the environment:
//!
//! - `CLADEWORKS_POOL_NAME`: pool name used in thread names and logs (default: "cladeworks")
//! - `CLADEWORKS_POOL_SIZE`: number of workers (default: 4)
//! - `CLADEWORKS_CONCURRENCY_PER_WORKER`: in-flight tasks per worker (default: 1)
//! - `CLADEWORKS_SPAWN_TIMEOUT_MS`: spawn handshake timeout (default: 30000)
//! - `CLADEWORKS_MAX_QUEUED_JOBS`: wait queue limit, a number or `unbounded` (default: unbounded)

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::worker::DEFAULT_SPAWN_TIMEOUT;

pub const ENV_POOL_NAME: &str = "CLADEWORKS_POOL_NAME";
pub const ENV_POOL_SIZE: &str = "CLADEWORKS_POOL_SIZE";
pub const ENV_CONCURRENCY_PER_WORKER: &str = "CLADEWORKS_CONCURRENCY_PER_WORKER";
pub const ENV_SPAWN_TIMEOUT_MS: &str = "CLADEWORKS_SPAWN_TIMEOUT_MS";
pub const ENV_MAX_QUEUED_JOBS: &str = "CLADEWORKS_MAX_QUEUED_JOBS";

/// Worker pool configuration
///
/// # Example
///
/// ```
/// use cladeworks_workers::PoolConfig;
///
/// let config = PoolConfig::new("analysis")
///     .with_size(2)
///     .with_max_queued_jobs(16);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool name, used as thread name prefix and in logs
    pub name: String,

    /// Number of workers
    pub size: usize,

    /// Maximum in-flight tasks per worker
    pub concurrency_per_worker: usize,

    /// Maximum tasks waiting for a free worker (`None` = unbounded)
    pub max_queued_jobs: Option<usize>,

    /// Spawn handshake timeout
    #[serde(with = "duration_millis")]
    pub spawn_timeout: Duration,

    /// Live worker floor below which a crashed worker is replaced
    pub min_workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "cladeworks".to_string(),
            size: 4,
            concurrency_per_worker: 1,
            max_queued_jobs: None,
            spawn_timeout: DEFAULT_SPAWN_TIMEOUT,
            min_workers: 1,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the given pool name and defaults otherwise
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Read configuration from the environment
    ///
    /// Unparsable values are logged and replaced by the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let max_queued_jobs = match lookup(ENV_MAX_QUEUED_JOBS) {
            None => defaults.max_queued_jobs,
            Some(value) if value.eq_ignore_ascii_case("unbounded") => None,
            Some(value) => match value.parse() {
                Ok(limit) => Some(limit),
                Err(_) => {
                    warn!(var = ENV_MAX_QUEUED_JOBS, %value, "Ignoring invalid value");
                    defaults.max_queued_jobs
                }
            },
        };

        Self {
            name: lookup(ENV_POOL_NAME).unwrap_or(defaults.name),
            size: parse_var(&lookup, ENV_POOL_SIZE).unwrap_or(defaults.size),
            concurrency_per_worker: parse_var(&lookup, ENV_CONCURRENCY_PER_WORKER)
                .unwrap_or(defaults.concurrency_per_worker),
            max_queued_jobs,
            spawn_timeout: parse_var(&lookup, ENV_SPAWN_TIMEOUT_MS)
                .map(Duration::from_millis)
                .unwrap_or(defaults.spawn_timeout),
            min_workers: defaults.min_workers,
        }
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the number of workers
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size.max(1);
        self
    }

    /// Set the in-flight limit per worker
    pub fn with_concurrency_per_worker(mut self, concurrency: usize) -> Self {
        self.concurrency_per_worker = concurrency.max(1);
        self
    }

    /// Bound the wait queue
    pub fn with_max_queued_jobs(mut self, limit: usize) -> Self {
        self.max_queued_jobs = Some(limit);
        self
    }

    /// Let the wait queue grow without bound
    pub fn unbounded(mut self) -> Self {
        self.max_queued_jobs = None;
        self
    }

    /// Set the spawn handshake timeout
    pub fn with_spawn_timeout(mut self, timeout: Duration) -> Self {
        self.spawn_timeout = timeout;
        self
    }

    /// Set the live worker floor (0 disables replacement)
    pub fn with_min_workers(mut self, min_workers: usize) -> Self {
        self.min_workers = min_workers;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size == 0 {
            return Err(ConfigError::ZeroSize);
        }
        if self.concurrency_per_worker == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.spawn_timeout.is_zero() {
            return Err(ConfigError::ZeroSpawnTimeout);
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Option<T> {
    let value = lookup(var)?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(var, %value, "Ignoring invalid value");
            None
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("pool size must be at least 1")]
    ZeroSize,

    #[error("concurrency per worker must be at least 1")]
    ZeroConcurrency,

    #[error("spawn timeout must be non-zero")]
    ZeroSpawnTimeout,
}

/// Serde support for Duration as milliseconds
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
