//! The three error tiers.
//!
//! | Tier | Type | Effect |
//! |------|------|--------|
//! | Row | [`ParseError`] | Collected into the result; the stream continues |
//! | Stream | [`FatalError`] | Ends the operation |
//! | Pool | [`PoolError`] | Ends a worker call |

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error as ThisError;

/// Codes for recoverable, per-row errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowErrorCode {
    /// No `kind` field and no fallback kind.
    MissingKind,
    /// The record could not be parsed.
    InvalidRecord,
    /// The record exceeds the per-entry byte cap.
    TooLarge,
    /// An archive entry failed to decompress.
    Decompress,
    /// An archive entry name escapes the archive root.
    InvalidPath,
    /// Recomputed content hash differs from the manifest.
    HashMismatch,
    /// A required field other than `kind` is absent.
    SchemaMismatch,
}

impl RowErrorCode {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MissingKind => "MISSING_KIND",
            Self::InvalidRecord => "INVALID_RECORD",
            Self::TooLarge => "TOO_LARGE",
            Self::Decompress => "DECOMPRESS",
            Self::InvalidPath => "INVALID_PATH",
            Self::HashMismatch => "HASH_MISMATCH",
            Self::SchemaMismatch => "SCHEMA_MISMATCH",
        }
    }
}

impl fmt::Display for RowErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recoverable error attached to one source record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    /// Error code.
    pub code: RowErrorCode,
    /// 1-based position of the offending record.
    pub ordinal: u64,
    /// Optional human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ParseError {
    /// Creates a row error without detail.
    #[must_use]
    pub const fn new(code: RowErrorCode, ordinal: u64) -> Self {
        Self {
            code,
            ordinal,
            detail: None,
        }
    }

    /// Attaches a detail message.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record {}: {}", self.ordinal, self.code)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

/// Codes for stream-ending errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FatalCode {
    /// Decompressed archive bytes exceed the total cap.
    ArchiveLimit,
    /// Decompressed/compressed ratio exceeds the cap.
    CompressionRatio,
    /// The input is not a valid instance of its format.
    InvalidFormat,
    /// The archive manifest is unreadable.
    InvalidManifest,
    /// The underlying parser failed irrecoverably.
    ParserError,
    /// More rows than `max_items`.
    RowLimit,
    /// Unknown or unsupported format.
    Unsupported,
}

impl FatalCode {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ArchiveLimit => "ARCHIVE_LIMIT",
            Self::CompressionRatio => "COMPRESSION_RATIO",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::InvalidManifest => "INVALID_MANIFEST",
            Self::ParserError => "PARSER_ERROR",
            Self::RowLimit => "ROW_LIMIT",
            Self::Unsupported => "UNSUPPORTED",
        }
    }
}

impl fmt::Display for FatalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stream-ending error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ThisError)]
#[error("fatal {code}{}", detail_suffix(.detail.as_deref()))]
pub struct FatalError {
    /// Error code.
    pub code: FatalCode,
    /// Optional human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl FatalError {
    /// Creates a fatal error without detail.
    #[must_use]
    pub const fn new(code: FatalCode) -> Self {
        Self { code, detail: None }
    }

    /// Creates a fatal error with a detail message.
    #[must_use]
    pub fn with_detail(code: FatalCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: Some(detail.into()),
        }
    }
}

/// Error code carried by [`PoolError::Parse`].
///
/// The RPC error union reports both row-tier and stream-tier codes under a
/// single `code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    /// A row-tier code.
    Row(RowErrorCode),
    /// A stream-tier code.
    Fatal(FatalCode),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Row(code) => code.fmt(f),
            Self::Fatal(code) => code.fmt(f),
        }
    }
}

/// Errors returned by a worker pool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ThisError)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum PoolError {
    /// The worker reported a parse or fetch failure.
    #[error("parse failed with {code}{}", detail_suffix(.detail.as_deref()))]
    Parse {
        /// Error code.
        code: ErrorCode,
        /// Offending record, when the failure is tied to one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ordinal: Option<u64>,
        /// Optional detail (for fetch failures, the HTTP status).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    /// No terminal value arrived within soft timeout + grace period.
    #[error(
        "worker call timed out after {elapsed_ms}ms (soft limit {soft_limit_ms}ms, hard limit {hard_limit_ms}ms)"
    )]
    Timeout {
        /// Time since dispatch.
        elapsed_ms: u64,
        /// Soft execution budget.
        soft_limit_ms: u64,
        /// Soft budget plus grace period.
        hard_limit_ms: u64,
    },

    /// The worker channel closed before a terminal value.
    #[error("worker {worker_id} crashed: {reason}")]
    WorkerCrash {
        /// Identifier of the worker that served the call.
        worker_id: usize,
        /// Crash reason.
        reason: String,
    },
}

impl PoolError {
    /// Returns the metrics outcome label for this error.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse_error",
            Self::Timeout { .. } => "timeout",
            Self::WorkerCrash { .. } => "crash",
        }
    }
}

impl From<FatalError> for PoolError {
    fn from(error: FatalError) -> Self {
        Self::Parse {
            code: ErrorCode::Fatal(error.code),
            ordinal: None,
            detail: error.detail,
        }
    }
}

impl From<ParseError> for PoolError {
    fn from(error: ParseError) -> Self {
        Self::Parse {
            code: ErrorCode::Row(error.code),
            ordinal: Some(error.ordinal),
            detail: error.detail,
        }
    }
}

fn detail_suffix(detail: Option<&str>) -> String {
    detail.map(|d| format!(": {d}")).unwrap_or_default()
}
