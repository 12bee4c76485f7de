//! Core types shared by format adapters.

use crate::config::Limits;
use crate::models::{ExportAsset, FatalError, Row};
use crate::Result;

/// A row together with the number of source bytes it consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRow {
    /// The parsed row.
    pub row: Row,
    /// Source bytes attributed to this row, for progress accounting.
    pub bytes: u64,
}

impl ParsedRow {
    /// Creates a parsed row.
    #[must_use]
    pub fn new(row: impl Into<Row>, bytes: u64) -> Self {
        Self {
            row: row.into(),
            bytes,
        }
    }
}

/// Lazy, pull-based sequence of rows.
///
/// An `Err` item is stream-ending; parsers yield nothing after it.
pub type RowIter = Box<dyn Iterator<Item = std::result::Result<ParsedRow, FatalError>> + Send>;

/// Per-input parsing context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseContext {
    /// Size limits.
    pub limits: Limits,
    /// Kind used when a record carries none.
    pub fallback_kind: Option<String>,
}

impl ParseContext {
    /// Creates a parsing context.
    #[must_use]
    pub const fn new(limits: Limits, fallback_kind: Option<String>) -> Self {
        Self {
            limits,
            fallback_kind,
        }
    }

    /// Returns the fallback kind.
    #[must_use]
    pub fn fallback(&self) -> Option<&str> {
        self.fallback_kind.as_deref()
    }
}

/// Sink for exported assets.
///
/// # Lifecycle
///
/// 1. Call `write()` for each asset
/// 2. Call `take_chunk()` at batch boundaries to drain text output
/// 3. Call `finalize()` for footers and the remaining bytes
///
/// Binary sinks buffer everything and return it from `finalize()`.
pub trait ExportSink: Send {
    /// Writes a single asset to the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn write(&mut self, asset: &ExportAsset) -> Result<()>;

    /// Takes the bytes produced since the last call.
    ///
    /// # Errors
    ///
    /// Returns an error if buffered output cannot be flushed.
    fn take_chunk(&mut self) -> Result<Vec<u8>>;

    /// Finishes the export and returns the remaining bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the footer or archive cannot be written.
    fn finalize(self: Box<Self>) -> Result<Vec<u8>>;
}
