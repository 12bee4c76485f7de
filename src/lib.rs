//! # Bulkport
//!
//! Bulk import and export of typed content assets.
//!
//! Bulkport reads assets out of CSV/TSV, JSON/NDJSON, YAML, XML, XLSX, ZIP
//! and plain-text inputs, and writes them back out in the same formats.
//! Untrusted files fetched from presigned URLs are parsed inside an isolated
//! worker pool with a soft/hard timeout and crash containment.
//!
//! ## Features
//!
//! - Lazy, pull-based row parsing with per-row error accumulation
//! - Periodic progress snapshots with throughput-based ETA
//! - Zip-bomb guards (entry, total and compression-ratio caps)
//! - Content-addressed integrity checks for manifest archives
//! - Lossless export/import round trips through manifest ZIPs
//!
//! ## Example
//!
//! ```rust,ignore
//! use bulkport::io::{ImportOptions, ImportService, TransferInput};
//! use bulkport::TransferConfig;
//!
//! let service = ImportService::new(TransferConfig::default());
//! let input = TransferInput::from_bytes("assets.csv", b"kind,content\nicon,abc\n".to_vec());
//! let result = service.import_all(vec![input], &ImportOptions::default())?;
//! assert_eq!(result.items.len(), 1);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod io;
pub mod models;
pub mod observability;
pub mod pool;
pub mod worker;

// Re-exports for convenience
pub use config::{Limits, PoolConfig, ProgressSettings, TransferConfig, XmlSettings};
pub use models::{
    Asset, ExportAsset, FatalCode, FatalError, Manifest, ManifestEntry, ParseError, ParseResult,
    PoolError, Progress, Row, RowErrorCode, TransferEvent,
};
pub use pool::WorkerPool;

/// Error type for bulkport operations.
///
/// Row-level problems never surface here; they travel inside
/// [`Row::Error`] and end up in [`ParseResult::errors`].
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Unknown format names, unreadable export input, bad CLI arguments |
/// | `OperationFailed` | I/O errors, serializer failures, config file parse errors |
/// | `Fatal` | A parse stream ended with a stream-level error |
/// | `Pool` | A worker call timed out, crashed or failed to parse |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A parse stream terminated with a stream-level error.
    #[error(transparent)]
    Fatal(#[from] FatalError),

    /// A worker pool call failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl Error {
    /// Builds an [`Error::OperationFailed`] from any displayable cause.
    pub fn operation(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for bulkport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::operation("read_input", "file not found");
        assert_eq!(err.to_string(), "operation 'read_input' failed: file not found");

        let err = Error::from(FatalError::new(FatalCode::RowLimit));
        assert!(err.to_string().contains("ROW_LIMIT"));
    }
}
