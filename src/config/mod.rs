//! Configuration management.
//!
//! [`TransferConfig`] is built once at startup and passed explicitly into the
//! codec registry, parsers, services and the worker pool. It is never mutated
//! after construction.
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. `config.toml` in the platform config dir (or an explicit path)
//! 3. `BULKPORT_*` environment variables

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default number of assets per export chunk.
pub const DEFAULT_BATCH_SIZE: usize = 500;
/// Default per-entry byte cap (5 MiB).
pub const DEFAULT_ENTRY_BYTES: u64 = 5 * 1024 * 1024;
/// Default total decompressed byte cap (50 MiB).
pub const DEFAULT_TOTAL_BYTES: u64 = 50 * 1024 * 1024;
/// Default decompressed/compressed ratio cap.
pub const DEFAULT_COMPRESSION_RATIO: u64 = 100;
/// Default row ceiling.
pub const DEFAULT_MAX_ITEMS: usize = 10_000;
/// Default download cap for worker fetches (100 MiB).
pub const DEFAULT_DOWNLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Size and count limits applied to every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Assets per export chunk.
    pub batch_size: usize,
    /// Maximum bytes of a single record or archive entry.
    pub entry_bytes: u64,
    /// Maximum decompressed bytes across one archive.
    pub total_bytes: u64,
    /// Maximum decompressed-so-far / compressed-size ratio.
    pub compression_ratio: u64,
    /// Maximum rows per operation.
    pub max_items: usize,
    /// Maximum response body size for worker fetches.
    pub download_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            entry_bytes: DEFAULT_ENTRY_BYTES,
            total_bytes: DEFAULT_TOTAL_BYTES,
            compression_ratio: DEFAULT_COMPRESSION_RATIO,
            max_items: DEFAULT_MAX_ITEMS,
            download_bytes: DEFAULT_DOWNLOAD_BYTES,
        }
    }
}

/// Thresholds for progress emission.
///
/// A snapshot is emitted when either threshold is crossed since the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSettings {
    /// Rows between snapshots.
    pub row_interval: u64,
    /// Bytes between snapshots.
    pub byte_interval: u64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            row_interval: 100,
            byte_interval: 10 * 1024,
        }
    }
}

/// XML parsing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlSettings {
    /// Lower-cased tag names that open an asset.
    pub node_tag_names: Vec<String>,
}

impl Default for XmlSettings {
    fn default() -> Self {
        Self {
            node_tag_names: vec!["asset".to_string(), "item".to_string(), "record".to_string()],
        }
    }
}

/// Worker pool configuration. Process-wide and read-only after start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers.
    pub size: usize,
    /// Concurrent calls per worker.
    pub concurrency: usize,
    /// Primary execution budget.
    pub soft_timeout: Duration,
    /// Extra time granted after the soft budget before the call is failed.
    pub grace_period: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            concurrency: 1,
            soft_timeout: Duration::from_secs(60),
            grace_period: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    /// Creates a new pool configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of workers.
    #[must_use]
    pub const fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Sets the concurrent calls per worker.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the soft timeout.
    #[must_use]
    pub const fn with_soft_timeout(mut self, timeout: Duration) -> Self {
        self.soft_timeout = timeout;
        self
    }

    /// Sets the grace period.
    #[must_use]
    pub const fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Returns the hard timeout (soft timeout plus grace period).
    #[must_use]
    pub fn total_timeout(&self) -> Duration {
        self.soft_timeout + self.grace_period
    }

    /// Returns the maximum number of in-flight calls across the pool.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.size.max(1) * self.concurrency.max(1)
    }
}

/// Main configuration for bulkport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferConfig {
    /// Size and count limits.
    pub limits: Limits,
    /// Progress emission thresholds.
    pub progress: ProgressSettings,
    /// XML parsing settings.
    pub xml: XmlSettings,
    /// Worker pool settings.
    pub pool: PoolConfig,
    /// Kind used when a record carries none.
    pub fallback_kind: Option<String>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Limits section.
    pub limits: Option<ConfigFileLimits>,
    /// Progress section.
    pub progress: Option<ConfigFileProgress>,
    /// XML section.
    pub xml: Option<ConfigFileXml>,
    /// Pool section.
    pub pool: Option<ConfigFilePool>,
    /// Fallback kind.
    pub fallback_kind: Option<String>,
}

/// Limits section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLimits {
    /// Export batch size.
    pub batch_size: Option<usize>,
    /// Per-entry byte cap.
    pub entry_bytes: Option<u64>,
    /// Total decompressed byte cap.
    pub total_bytes: Option<u64>,
    /// Compression ratio cap.
    pub compression_ratio: Option<u64>,
    /// Row ceiling.
    pub max_items: Option<usize>,
    /// Download cap.
    pub download_bytes: Option<u64>,
}

/// Progress section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileProgress {
    /// Rows between snapshots.
    pub row_interval: Option<u64>,
    /// Bytes between snapshots.
    pub byte_interval: Option<u64>,
}

/// XML section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileXml {
    /// Tag names that open an asset.
    pub node_tag_names: Option<Vec<String>>,
}

/// Pool section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFilePool {
    /// Worker count.
    pub size: Option<usize>,
    /// Concurrent calls per worker.
    pub concurrency: Option<usize>,
    /// Soft timeout in milliseconds.
    pub soft_timeout_ms: Option<u64>,
    /// Grace period in milliseconds.
    pub grace_period_ms: Option<u64>,
}

impl TransferConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::operation("read_config_file", e))?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration TOML.
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::operation("parse_config_file", e))?;
        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks `<config dir>/bulkport/config.toml`. Returns defaults if the
    /// file is missing or unreadable.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let path = base_dirs.config_dir().join("bulkport").join("config.toml");
        if path.exists() {
            match Self::load_from_file(&path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Ignoring config file"),
            }
        }

        Self::default()
    }

    /// Converts a `ConfigFile` to `TransferConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(limits) = file.limits {
            if let Some(v) = limits.batch_size {
                config.limits.batch_size = v.max(1);
            }
            if let Some(v) = limits.entry_bytes {
                config.limits.entry_bytes = v.max(1);
            }
            if let Some(v) = limits.total_bytes {
                config.limits.total_bytes = v.max(1);
            }
            if let Some(v) = limits.compression_ratio {
                config.limits.compression_ratio = v.max(1);
            }
            if let Some(v) = limits.max_items {
                config.limits.max_items = v.max(1);
            }
            if let Some(v) = limits.download_bytes {
                config.limits.download_bytes = v.max(1);
            }
        }
        if let Some(progress) = file.progress {
            if let Some(v) = progress.row_interval {
                config.progress.row_interval = v.max(1);
            }
            if let Some(v) = progress.byte_interval {
                config.progress.byte_interval = v.max(1);
            }
        }
        if let Some(names) = file.xml.and_then(|xml| xml.node_tag_names) {
            config.xml.node_tag_names = names.iter().map(|n| n.to_lowercase()).collect();
        }
        if let Some(pool) = file.pool {
            if let Some(v) = pool.size {
                config.pool.size = v.max(1);
            }
            if let Some(v) = pool.concurrency {
                config.pool.concurrency = v.max(1);
            }
            if let Some(v) = pool.soft_timeout_ms {
                config.pool.soft_timeout = Duration::from_millis(v);
            }
            if let Some(v) = pool.grace_period_ms {
                config.pool.grace_period = Duration::from_millis(v);
            }
        }
        config.fallback_kind = file.fallback_kind.filter(|k| !k.trim().is_empty());

        config
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `BULKPORT_BATCH_SIZE` | `limits.batch_size` |
    /// | `BULKPORT_ENTRY_BYTES` | `limits.entry_bytes` |
    /// | `BULKPORT_TOTAL_BYTES` | `limits.total_bytes` |
    /// | `BULKPORT_COMPRESSION_RATIO` | `limits.compression_ratio` |
    /// | `BULKPORT_MAX_ITEMS` | `limits.max_items` |
    /// | `BULKPORT_POOL_SIZE` | `pool.size` |
    /// | `BULKPORT_POOL_CONCURRENCY` | `pool.concurrency` |
    /// | `BULKPORT_SOFT_TIMEOUT_MS` | `pool.soft_timeout` |
    /// | `BULKPORT_GRACE_PERIOD_MS` | `pool.grace_period` |
    /// | `BULKPORT_FALLBACK_KIND` | `fallback_kind` |
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = parse_env::<usize>("BULKPORT_BATCH_SIZE") {
            self.limits.batch_size = v.max(1);
        }
        if let Some(v) = parse_env::<u64>("BULKPORT_ENTRY_BYTES") {
            self.limits.entry_bytes = v.max(1);
        }
        if let Some(v) = parse_env::<u64>("BULKPORT_TOTAL_BYTES") {
            self.limits.total_bytes = v.max(1);
        }
        if let Some(v) = parse_env::<u64>("BULKPORT_COMPRESSION_RATIO") {
            self.limits.compression_ratio = v.max(1);
        }
        if let Some(v) = parse_env::<usize>("BULKPORT_MAX_ITEMS") {
            self.limits.max_items = v.max(1);
        }
        if let Some(v) = parse_env::<usize>("BULKPORT_POOL_SIZE") {
            self.pool.size = v.max(1);
        }
        if let Some(v) = parse_env::<usize>("BULKPORT_POOL_CONCURRENCY") {
            self.pool.concurrency = v.max(1);
        }
        if let Some(v) = parse_env::<u64>("BULKPORT_SOFT_TIMEOUT_MS") {
            self.pool.soft_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_env::<u64>("BULKPORT_GRACE_PERIOD_MS") {
            self.pool.grace_period = Duration::from_millis(v);
        }
        if let Ok(v) = std::env::var("BULKPORT_FALLBACK_KIND") {
            let v = v.trim();
            if !v.is_empty() {
                self.fallback_kind = Some(v.to_string());
            }
        }
        self
    }

    /// Sets the limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the pool configuration.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the progress thresholds.
    #[must_use]
    pub const fn with_progress(mut self, progress: ProgressSettings) -> Self {
        self.progress = progress;
        self
    }

    /// Sets the fallback kind.
    #[must_use]
    pub fn with_fallback_kind(mut self, kind: impl Into<String>) -> Self {
        self.fallback_kind = Some(kind.into());
        self
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.limits.batch_size, 500);
        assert_eq!(config.limits.entry_bytes, 5 * 1024 * 1024);
        assert_eq!(config.limits.total_bytes, 50 * 1024 * 1024);
        assert_eq!(config.limits.compression_ratio, 100);
        assert_eq!(config.limits.max_items, 10_000);
        assert_eq!(config.progress.row_interval, 100);
        assert_eq!(config.progress.byte_interval, 10_240);
        assert_eq!(config.pool.size, 4);
        assert_eq!(config.pool.concurrency, 1);
        assert!(config.fallback_kind.is_none());
    }

    #[test]
    fn test_from_toml() {
        let config = TransferConfig::from_toml(
            r#"
fallback_kind = "icon"

[limits]
max_items = 50
compression_ratio = 0

[xml]
node_tag_names = ["Entry"]

[pool]
size = 2
soft_timeout_ms = 1500
grace_period_ms = 500
"#,
        )
        .unwrap();

        assert_eq!(config.limits.max_items, 50);
        assert_eq!(config.limits.compression_ratio, 1);
        assert_eq!(config.xml.node_tag_names, vec!["entry"]);
        assert_eq!(config.pool.size, 2);
        assert_eq!(config.pool.total_timeout(), Duration::from_millis(2000));
        assert_eq!(config.fallback_kind.as_deref(), Some("icon"));
    }

    #[test]
    fn test_from_toml_rejects_bad_types() {
        assert!(TransferConfig::from_toml("[limits]\nmax_items = \"many\"\n").is_err());
    }

    #[test]
    fn test_pool_capacity() {
        let pool = PoolConfig::new().with_size(3).with_concurrency(2);
        assert_eq!(pool.capacity(), 6);
        assert_eq!(PoolConfig::new().with_size(0).capacity(), 1);
    }
}
