//! Structured logging configuration.

use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" | "text" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Event filter.
    pub filter: EnvFilter,
}

impl LoggingConfig {
    /// Builds logging configuration from the environment.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `BULKPORT_LOG` | Filter directives | `RUST_LOG`, then `info` (`debug` if verbose) |
    /// | `BULKPORT_LOG_FORMAT` | `json` or `pretty` | `pretty` |
    #[must_use]
    pub fn from_env(verbose: bool) -> Self {
        let directives = std::env::var("BULKPORT_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok();
        let format = std::env::var("BULKPORT_LOG_FORMAT")
            .ok()
            .and_then(|value| LogFormat::parse(&value))
            .unwrap_or_default();
        Self {
            format,
            filter: build_filter(directives.as_deref(), verbose),
        }
    }
}

/// Builds an `EnvFilter`, falling back to the default level on bad directives.
fn build_filter(directives: Option<&str>, verbose: bool) -> EnvFilter {
    let default_level = if verbose { "debug" } else { "info" };
    directives
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(default_level))
}
