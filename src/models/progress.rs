//! Progress snapshots and terminal results.

use super::{Asset, ParseError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A point-in-time progress snapshot.
///
/// `bytes_processed` and `rows_processed` never decrease within one
/// operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Source bytes consumed so far.
    pub bytes_processed: u64,
    /// Total source bytes (0 when unknown).
    pub total_bytes: u64,
    /// Rows yielded so far, successes and errors alike.
    pub rows_processed: u64,
    /// Completion percentage in `0.0..=100.0` (0 when total is unknown).
    pub percentage: f64,
    /// Estimated time remaining in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_ms: Option<u64>,
}

impl Progress {
    /// Returns the ETA as a duration.
    #[must_use]
    pub fn eta(&self) -> Option<Duration> {
        self.eta_ms.map(Duration::from_millis)
    }
}

/// Terminal aggregate of a parse operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseResult {
    /// Successfully parsed assets, in source order.
    pub items: Vec<Asset>,
    /// Row-level errors, in source order.
    pub errors: Vec<ParseError>,
}

impl ParseResult {
    /// Creates an empty result.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            items: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Returns whether every record parsed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of records seen.
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.items.len() + self.errors.len()
    }
}

/// One element of the interleaved progress/result sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferEvent {
    /// Periodic progress snapshot.
    Progress(Progress),
    /// Terminal result; always the last event.
    Result(ParseResult),
}

impl TransferEvent {
    /// Returns the terminal result, if this is one.
    #[must_use]
    pub fn into_result(self) -> Option<ParseResult> {
        match self {
            Self::Result(result) => Some(result),
            Self::Progress(_) => None,
        }
    }
}
