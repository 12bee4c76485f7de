//! Progress accumulation and the interleaved event stream.
//!
//! [`TransferStream`] is the single parse core. In-process imports and pool
//! workers both drive it, so their `Progress | Result` sequences are
//! identical for the same input.

use crate::config::{ProgressSettings, TransferConfig};
use crate::io::codec::{CodecRegistry, Format};
use crate::io::formats;
use crate::io::input::TransferInput;
use crate::io::traits::{ParseContext, RowIter};
use crate::models::{FatalCode, FatalError, ParseResult, Progress, Row, TransferEvent};
use std::collections::VecDeque;
use std::time::Instant;

/// Running byte and row totals with threshold-based emission.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    settings: ProgressSettings,
    total_bytes: u64,
    started: Instant,
    bytes_processed: u64,
    rows_processed: u64,
    rows_since: u64,
    bytes_since: u64,
}

impl ProgressTracker {
    /// Creates a tracker. `total_bytes` of 0 means unknown.
    #[must_use]
    pub fn new(settings: ProgressSettings, total_bytes: u64) -> Self {
        Self {
            settings,
            total_bytes,
            started: Instant::now(),
            bytes_processed: 0,
            rows_processed: 0,
            rows_since: 0,
            bytes_since: 0,
        }
    }

    /// Records one row and returns a snapshot if either interval was crossed.
    pub fn record(&mut self, bytes: u64) -> Option<Progress> {
        self.rows_processed += 1;
        self.rows_since += 1;
        self.bytes_processed = self.bytes_processed.saturating_add(bytes);
        if self.total_bytes > 0 {
            self.bytes_processed = self.bytes_processed.min(self.total_bytes);
        }
        self.bytes_since = self.bytes_since.saturating_add(bytes);

        (self.rows_since >= self.settings.row_interval
            || self.bytes_since >= self.settings.byte_interval)
            .then(|| self.emit())
    }

    /// Emits a final snapshot if anything changed since the last one.
    pub fn flush(&mut self) -> Option<Progress> {
        (self.rows_since > 0 || self.bytes_since > 0).then(|| self.emit())
    }

    /// Returns the current snapshot without resetting the intervals.
    #[must_use]
    pub fn snapshot(&self) -> Progress {
        let percentage = if self.total_bytes == 0 {
            0.0
        } else {
            (self.bytes_processed as f64 * 100.0 / self.total_bytes as f64).min(100.0)
        };
        Progress {
            bytes_processed: self.bytes_processed,
            total_bytes: self.total_bytes,
            rows_processed: self.rows_processed,
            percentage,
            eta_ms: self.eta_ms(),
        }
    }

    /// Linear estimate: remaining bytes at the observed throughput.
    fn eta_ms(&self) -> Option<u64> {
        if self.total_bytes == 0 || self.bytes_processed == 0 {
            return None;
        }
        let elapsed = self.started.elapsed().as_millis();
        let remaining = u128::from(self.total_bytes.saturating_sub(self.bytes_processed));
        let eta = elapsed * remaining / u128::from(self.bytes_processed);
        Some(u64::try_from(eta).unwrap_or(u64::MAX))
    }

    fn emit(&mut self) -> Progress {
        self.rows_since = 0;
        self.bytes_since = 0;
        self.snapshot()
    }
}

/// How to parse a batch of inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOptions {
    /// Explicit format for every input; sniffed per input when `None`.
    pub format: Option<Format>,
    /// Kind used when a record carries none.
    pub fallback_kind: Option<String>,
    /// Overrides the summed input sizes as the progress denominator.
    pub total_bytes: Option<u64>,
}

/// Lazy `Progress | Result` sequence over one or more inputs.
///
/// Yields `Err` at most once, after which the stream is exhausted; no
/// `Result` follows a fatal error.
pub struct TransferStream {
    registry: CodecRegistry,
    context: ParseContext,
    format: Option<Format>,
    max_items: usize,
    pending: VecDeque<TransferInput>,
    current: Option<RowIter>,
    tracker: ProgressTracker,
    result: ParseResult,
    rows: usize,
    done: bool,
}

impl TransferStream {
    /// Creates a stream over `inputs`. Nothing is read until the first `next()`.
    #[must_use]
    pub fn new(inputs: Vec<TransferInput>, options: StreamOptions, config: &TransferConfig) -> Self {
        let total_bytes = options.total_bytes.unwrap_or_else(|| {
            inputs
                .iter()
                .map(|input| input.len().unwrap_or_default())
                .sum()
        });
        let fallback_kind = options
            .fallback_kind
            .or_else(|| config.fallback_kind.clone());
        Self {
            registry: CodecRegistry::new(config),
            context: ParseContext::new(config.limits.clone(), fallback_kind),
            format: options.format,
            max_items: config.limits.max_items,
            pending: inputs.into(),
            current: None,
            tracker: ProgressTracker::new(config.progress, total_bytes),
            result: ParseResult::new(),
            rows: 0,
            done: false,
        }
    }

    /// Drains the stream into its terminal result, calling `on_progress` for
    /// each snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error.
    pub fn collect_result(
        mut self,
        mut on_progress: impl FnMut(&Progress),
    ) -> Result<ParseResult, FatalError> {
        let mut terminal = None;
        for event in self.by_ref() {
            match event? {
                TransferEvent::Progress(progress) => on_progress(&progress),
                TransferEvent::Result(result) => terminal = Some(result),
            }
        }
        Ok(terminal.unwrap_or_default())
    }

    fn open_next(&mut self, input: TransferInput) -> Result<RowIter, FatalError> {
        let codec = match self.format {
            Some(format) => self.registry.codec_for(format),
            None => self.registry.detect(&input)?,
        };
        let name = input.name();
        tracing::debug!(
            input = name.as_deref().unwrap_or("<bytes>"),
            format = %codec.format,
            "Opening input"
        );
        formats::open_rows(input, &codec, &self.context)
    }

    fn fail(&mut self, error: FatalError) -> Option<Result<TransferEvent, FatalError>> {
        self.done = true;
        self.current = None;
        self.pending.clear();
        tracing::warn!(code = %error.code, rows = self.rows, "Parse terminated: {error}");
        Some(Err(error))
    }

    fn accept(&mut self, row: Row) {
        match row {
            Row::Asset(asset) => self.result.items.push(asset),
            Row::Error(error) => {
                tracing::debug!(code = %error.code, ordinal = error.ordinal, "Row rejected");
                self.result.errors.push(error);
            },
        }
    }
}

impl Iterator for TransferStream {
    type Item = Result<TransferEvent, FatalError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            let Some(rows) = self.current.as_mut() else {
                match self.pending.pop_front() {
                    Some(input) => match self.open_next(input) {
                        Ok(rows) => {
                            self.current = Some(rows);
                            continue;
                        },
                        Err(error) => return self.fail(error),
                    },
                    None => {
                        if let Some(progress) = self.tracker.flush() {
                            return Some(Ok(TransferEvent::Progress(progress)));
                        }
                        self.done = true;
                        metrics::counter!("bulkport_rows_total", "outcome" => "item")
                            .increment(self.result.items.len() as u64);
                        metrics::counter!("bulkport_rows_total", "outcome" => "error")
                            .increment(self.result.errors.len() as u64);
                        return Some(Ok(TransferEvent::Result(std::mem::take(
                            &mut self.result,
                        ))));
                    },
                }
            };

            match rows.next() {
                None => self.current = None,
                Some(Err(error)) => return self.fail(error),
                Some(Ok(parsed)) => {
                    self.rows += 1;
                    if self.rows > self.max_items {
                        return self.fail(FatalError::with_detail(
                            FatalCode::RowLimit,
                            format!("more than {} rows", self.max_items),
                        ));
                    }
                    self.accept(parsed.row);
                    if let Some(progress) = self.tracker.record(parsed.bytes) {
                        return Some(Ok(TransferEvent::Progress(progress)));
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::models::RowErrorCode;

    fn settings(rows: u64, bytes: u64) -> ProgressSettings {
        ProgressSettings {
            row_interval: rows,
            byte_interval: bytes,
        }
    }

    fn csv_input(rows: usize) -> TransferInput {
        let mut data = String::from("kind,content\n");
        for i in 0..rows {
            data.push_str(&format!("icon,c{i}\n"));
        }
        TransferInput::from_bytes("assets.csv", data.into_bytes())
    }

    #[test]
    fn test_tracker_row_interval() {
        let mut tracker = ProgressTracker::new(settings(2, u64::MAX), 0);
        assert!(tracker.record(1).is_none());
        let progress = tracker.record(1).unwrap();
        assert_eq!(progress.rows_processed, 2);
        assert_eq!(progress.bytes_processed, 2);
        assert!(tracker.record(1).is_none());
    }

    #[test]
    fn test_tracker_byte_interval() {
        let mut tracker = ProgressTracker::new(settings(1000, 10), 100);
        assert!(tracker.record(6).is_none());
        let progress = tracker.record(6).unwrap();
        assert_eq!(progress.bytes_processed, 12);
        assert!((progress.percentage - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tracker_unknown_total() {
        let mut tracker = ProgressTracker::new(settings(1, 1), 0);
        let progress = tracker.record(50).unwrap();
        assert!(progress.percentage.abs() < f64::EPSILON);
        assert!(progress.eta_ms.is_none());
    }

    #[test]
    fn test_tracker_flush_only_when_dirty() {
        let mut tracker = ProgressTracker::new(settings(1, 1), 10);
        assert!(tracker.flush().is_none());
        tracker.record(5);
        assert!(tracker.flush().is_none());
        tracker.rows_since = 0;
        tracker.bytes_since = 3;
        assert!(tracker.flush().is_some());
    }

    #[test]
    fn test_tracker_percentage_clamped() {
        let mut tracker = ProgressTracker::new(settings(1, 1), 10);
        let progress = tracker.record(25).unwrap();
        assert_eq!(progress.bytes_processed, 10);
        assert!((progress.percentage - 100.0).abs() < f64::EPSILON);
        assert_eq!(progress.eta_ms, Some(0));
    }

    #[test]
    fn test_stream_ends_with_result() {
        let config = TransferConfig::default().with_progress(settings(2, u64::MAX));
        let events: Vec<_> = TransferStream::new(vec![csv_input(5)], StreamOptions::default(), &config)
            .collect::<Result<_, _>>()
            .unwrap();

        let progress: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Progress(p) => Some(p.rows_processed),
                TransferEvent::Result(_) => None,
            })
            .collect();
        assert_eq!(progress, vec![2, 4, 5]);

        let result = events.last().cloned().and_then(TransferEvent::into_result).unwrap();
        assert_eq!(result.items.len(), 5);
        assert_eq!(result.items[4].ordinal, 5);
    }

    #[test]
    fn test_stream_spans_multiple_inputs() {
        let config = TransferConfig::default();
        let inputs = vec![
            csv_input(2),
            TransferInput::from_bytes("more.ndjson", b"{\"kind\":\"doc\",\"content\":\"x\"}\n".to_vec()),
        ];
        let result = TransferStream::new(inputs, StreamOptions::default(), &config)
            .collect_result(|_| {})
            .unwrap();
        assert_eq!(result.items.len(), 3);
        assert_eq!(result.items[2].kind, "doc");
        assert_eq!(result.items[2].ordinal, 1);
    }

    #[test]
    fn test_stream_row_limit_is_fatal_and_fused() {
        let config = TransferConfig::default().with_limits(Limits {
            max_items: 3,
            ..Limits::default()
        });
        let mut stream = TransferStream::new(vec![csv_input(10)], StreamOptions::default(), &config);
        let err = stream.find_map(Result::err).unwrap();
        assert_eq!(err.code, FatalCode::RowLimit);
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_stream_fallback_kind() {
        let config = TransferConfig::default();
        let input = TransferInput::from_bytes("a.csv", b"content\nabc\n".to_vec());

        let result = TransferStream::new(vec![input.clone()], StreamOptions::default(), &config)
            .collect_result(|_| {})
            .unwrap();
        assert_eq!(result.errors[0].code, RowErrorCode::MissingKind);

        let options = StreamOptions {
            fallback_kind: Some("note".to_string()),
            ..StreamOptions::default()
        };
        let result = TransferStream::new(vec![input], options, &config)
            .collect_result(|_| {})
            .unwrap();
        assert_eq!(result.items[0].kind, "note");
    }

    #[test]
    fn test_stream_explicit_format_overrides_extension() {
        let config = TransferConfig::default();
        let input = TransferInput::from_bytes("data.bin", b"kind,content\nicon,abc\n".to_vec());
        let options = StreamOptions {
            format: Some(Format::Csv),
            ..StreamOptions::default()
        };
        let result = TransferStream::new(vec![input], options, &config)
            .collect_result(|_| {})
            .unwrap();
        assert_eq!(result.items.len(), 1);
    }
}
