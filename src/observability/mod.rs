//! Observability: structured logging and Prometheus metrics.

mod logging;
mod metrics;

pub use logging::{LogFormat, LoggingConfig};
pub use metrics::{DEFAULT_METRICS_PORT, MetricsConfig, install_prometheus};

use crate::{Error, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Options for environment-based initialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Whether verbose output was requested via CLI.
    pub verbose: bool,
    /// Whether to expose metrics via HTTP listener.
    pub metrics_expose: bool,
}

/// Handle for installed observability components.
#[derive(Debug, Default)]
pub struct ObservabilityHandle {
    metrics: Option<PrometheusHandle>,
}

impl ObservabilityHandle {
    /// Renders the current metrics in Prometheus text format, if a recorder
    /// was installed.
    #[must_use]
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().map(PrometheusHandle::render)
    }
}

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Initializes observability using environment variables.
///
/// # Errors
///
/// Returns an error if observability has already been initialized or if any
/// component fails to install.
pub fn init_from_env(options: InitOptions) -> Result<ObservabilityHandle> {
    let metrics = MetricsConfig::from_env();
    init(LoggingConfig::from_env(options.verbose), &metrics, options.metrics_expose)
}

/// Installs the tracing subscriber and, when enabled, the metrics recorder.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
///
/// # Errors
///
/// Returns an error if observability has already been initialized or if any
/// component fails to install.
pub fn init(
    logging: LoggingConfig,
    metrics: &MetricsConfig,
    metrics_expose: bool,
) -> Result<ObservabilityHandle> {
    if OBSERVABILITY_INIT.get().is_some() {
        return Err(already_initialized());
    }

    match logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_names(true),
            )
            .with(logging.filter)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true),
            )
            .with(logging.filter)
            .try_init(),
    }
    .map_err(|e| Error::operation("observability_init", e))?;

    let metrics = install_prometheus(metrics, metrics_expose)?;

    OBSERVABILITY_INIT.set(()).map_err(|()| already_initialized())?;
    Ok(ObservabilityHandle { metrics })
}

fn already_initialized() -> Error {
    Error::operation("observability_init", "observability already initialized")
}
