// Telemetry Module
//
// Installs the process-wide tracing subscriber:
// - Env-driven log filter (RUST_LOG or LOG_LEVEL, default "info")
// - Console fmt layer on stderr with targets and thread names
//
// Worker threads inherit the global subscriber, so events emitted inside a
// computation module show up with the worker's thread name.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// ============================================================================
// Telemetry Configuration
// ============================================================================

/// Configuration for logging
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name, logged once at startup
    pub service_name: String,
    /// Whether to enable console logging
    pub enable_console: bool,
    /// Log filter (e.g., "info", "debug", "cladeworks_workers=debug")
    pub log_filter: Option<String>,
    /// Include thread names in console output (worker threads are named per pool)
    pub with_thread_names: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "cladeworks".to_string(),
            enable_console: true,
            log_filter: None,
            with_thread_names: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `CLADEWORKS_SERVICE_NAME`: Service name (default: "cladeworks")
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("CLADEWORKS_SERVICE_NAME")
                .unwrap_or_else(|_| "cladeworks".to_string()),
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            ..Default::default()
        }
    }

    /// Override the log filter
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Marker returned by [`init_telemetry`]
///
/// Keep it alive for the lifetime of the application. Dropping it logs the
/// shutdown so the last line of output marks a clean exit.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::debug!(service = %self.service_name, "Telemetry shut down");
    }
}

/// Install the global tracing subscriber
///
/// Fails if a global subscriber is already installed.
///
/// # Example
///
/// ```ignore
/// use cladeworks_workers::telemetry::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let _guard = init_telemetry(TelemetryConfig::from_env())?;
///     // ... your application code
///     Ok(())
/// }
/// ```
pub fn init_telemetry(
    config: TelemetryConfig,
) -> Result<TelemetryGuard, tracing_subscriber::util::TryInitError> {
    let console_layer = if config.enable_console {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_names(config.with_thread_names)
                .with_writer(std::io::stderr)
                .with_filter(config.filter()),
        )
    } else {
        None
    };

    tracing_subscriber::registry().with(console_layer).try_init()?;

    tracing::debug!(service = %config.service_name, "Telemetry initialized");

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}
