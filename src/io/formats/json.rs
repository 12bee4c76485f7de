//! JSON format adapter for import/export.
//!
//! Supports both newline-delimited JSON (NDJSON/JSONL) and JSON arrays.
//! Export always writes NDJSON.

use crate::io::formats::{RecordFields, io_fatal, read_line_capped, too_large};
use crate::io::input::ReadSeek;
use crate::io::traits::{ExportSink, ParseContext, ParsedRow, RowIter};
use crate::models::{ExportAsset, FatalCode, FatalError, ParseError, Row, RowErrorCode};
use crate::{Error, Result};
use serde_json::Value;
use std::io::{BufRead, BufReader, Read};

/// Opens a JSON parser.
///
/// Peeks at the first non-whitespace byte: `[` selects array mode, anything
/// else is read as NDJSON.
///
/// # Errors
///
/// Returns `INVALID_FORMAT` for a malformed array, or `PARSER_ERROR` if the
/// input cannot be read.
pub fn rows(reader: Box<dyn ReadSeek>, ctx: &ParseContext) -> std::result::Result<RowIter, FatalError> {
    let mut reader = BufReader::new(reader);
    let (leading, first) = skip_whitespace(&mut reader).map_err(|e| io_fatal(&e))?;
    if first == Some(b'[') {
        return array_rows(reader, leading, ctx);
    }
    Ok(Box::new(NdjsonRows::new(reader, ctx, leading)))
}

/// Opens an NDJSON parser.
#[must_use]
pub fn ndjson_rows(reader: Box<dyn ReadSeek>, ctx: &ParseContext) -> RowIter {
    Box::new(NdjsonRows::new(BufReader::new(reader), ctx, 0))
}

/// Consumes leading whitespace; returns its length and the next byte.
fn skip_whitespace<R: BufRead>(reader: &mut R) -> std::io::Result<(u64, Option<u8>)> {
    let mut skipped = 0u64;
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Ok((skipped, None));
        }
        match available.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(i) => {
                let next = available[i];
                reader.consume(i);
                return Ok((skipped + i as u64, Some(next)));
            },
            None => {
                let n = available.len();
                reader.consume(n);
                skipped += n as u64;
            },
        }
    }
}

/// Array mode must parse the whole document before yielding, so the array
/// as a whole is held to the archive-wide byte cap.
fn array_rows<R: Read>(
    reader: R,
    leading: u64,
    ctx: &ParseContext,
) -> std::result::Result<RowIter, FatalError> {
    let cap = ctx.limits.total_bytes;
    let mut data = Vec::new();
    reader
        .take(cap.saturating_add(1))
        .read_to_end(&mut data)
        .map_err(|e| io_fatal(&e))?;
    if data.len() as u64 > cap {
        return Err(FatalError::with_detail(
            FatalCode::ArchiveLimit,
            format!("JSON array exceeds {cap} bytes"),
        ));
    }

    let values: Vec<Value> = serde_json::from_slice(&data)
        .map_err(|e| FatalError::with_detail(FatalCode::InvalidFormat, e.to_string()))?;

    let total = data.len() as u64 + leading;
    let count = values.len() as u64;
    let share = total.checked_div(count).unwrap_or_default();
    let fallback = ctx.fallback_kind.clone();

    let rows = values.into_iter().zip(1u64..).map(move |(value, ordinal)| {
        // Last element absorbs the remainder so the shares sum to the total.
        let bytes = if ordinal == count {
            total - share * (count - 1)
        } else {
            share
        };
        Ok(ParsedRow::new(value_row(value, ordinal, fallback.as_deref()), bytes))
    });
    Ok(Box::new(rows))
}

fn value_row(value: Value, ordinal: u64, fallback: Option<&str>) -> Row {
    match RecordFields::from_value(value) {
        Ok(fields) => fields.into_row(ordinal, fallback),
        Err(detail) => ParseError::new(RowErrorCode::InvalidRecord, ordinal)
            .with_detail(detail)
            .into(),
    }
}

/// Lazy NDJSON row parser.
struct NdjsonRows<R> {
    reader: R,
    line: Vec<u8>,
    ordinal: u64,
    /// Bytes of skipped blank lines, attributed to the next row.
    carried: u64,
    ctx: ParseContext,
    done: bool,
}

impl<R: BufRead> NdjsonRows<R> {
    fn new(reader: R, ctx: &ParseContext, carried: u64) -> Self {
        Self {
            reader,
            line: Vec::new(),
            ordinal: 0,
            carried,
            ctx: ctx.clone(),
            done: false,
        }
    }
}

impl<R: BufRead + Send> Iterator for NdjsonRows<R> {
    type Item = std::result::Result<ParsedRow, FatalError>;

    fn next(&mut self) -> Option<Self::Item> {
        let cap = self.ctx.limits.entry_bytes;
        while !self.done {
            let line = match read_line_capped(&mut self.reader, &mut self.line, cap) {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.done = true;
                    break;
                },
                Err(e) => {
                    self.done = true;
                    return Some(Err(io_fatal(&e)));
                },
            };
            let bytes = std::mem::take(&mut self.carried) + line.consumed;

            if line.truncated {
                self.ordinal += 1;
                return Some(Ok(ParsedRow::new(too_large(self.ordinal, cap), bytes)));
            }
            if self.line.trim_ascii().is_empty() {
                self.carried = bytes;
                continue;
            }

            self.ordinal += 1;
            let row = match serde_json::from_slice::<Value>(&self.line) {
                Ok(value) => value_row(value, self.ordinal, self.ctx.fallback()),
                Err(e) => ParseError::new(RowErrorCode::InvalidRecord, self.ordinal)
                    .with_detail(e.to_string())
                    .into(),
            };
            return Some(Ok(ParsedRow::new(row, bytes)));
        }
        None
    }
}

/// NDJSON export sink.
///
/// Writes one JSON object per line.
pub struct JsonExportSink {
    buffer: Vec<u8>,
}

impl JsonExportSink {
    /// Creates a new JSON export sink.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }
}

impl Default for JsonExportSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportSink for JsonExportSink {
    fn write(&mut self, asset: &ExportAsset) -> Result<()> {
        serde_json::to_writer(&mut self.buffer, asset)
            .map_err(|e| Error::operation("serialize_json", e))?;
        self.buffer.push(b'\n');
        Ok(())
    }

    fn take_chunk(&mut self) -> Result<Vec<u8>> {
        Ok(std::mem::take(&mut self.buffer))
    }

    fn finalize(self: Box<Self>) -> Result<Vec<u8>> {
        Ok(self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use std::io::Cursor;

    fn collect(iter: RowIter) -> Vec<ParsedRow> {
        iter.collect::<std::result::Result<_, _>>().unwrap()
    }

    fn ctx() -> ParseContext {
        ParseContext::new(Limits::default(), None)
    }

    fn input(s: &str) -> Box<dyn ReadSeek> {
        Box::new(Cursor::new(s.as_bytes().to_vec()))
    }

    #[test]
    fn test_import_ndjson() {
        let data = "{\"kind\":\"icon\",\"content\":\"a\"}\n\n{\"type\":\"font\",\"body\":\"b\"}\n";
        let rows = collect(rows(input(data), &ctx()).unwrap());
        assert_eq!(rows.len(), 2);
        assert!(matches!(&rows[1].row, Row::Asset(a) if a.kind == "font" && a.ordinal == 2));

        let total: u64 = rows.iter().map(|r| r.bytes).sum();
        assert_eq!(total, data.len() as u64);
    }

    #[test]
    fn test_import_array() {
        let data = "  [{\"kind\":\"icon\",\"content\":\"a\"}, {\"kind\":\"icon\",\"content\":\"b\"}, 3]";
        let rows = collect(rows(input(data), &ctx()).unwrap());
        assert_eq!(rows.len(), 3);
        assert!(rows[0].row.is_asset());
        assert!(matches!(&rows[2].row, Row::Error(e) if e.code == RowErrorCode::InvalidRecord && e.ordinal == 3));

        let total: u64 = rows.iter().map(|r| r.bytes).sum();
        assert_eq!(total, data.len() as u64);
    }

    #[test]
    fn test_import_malformed_array_is_fatal() {
        let Err(err) = rows(input("[{\"kind\":"), &ctx()) else {
            panic!("expected fatal error");
        };
        assert_eq!(err.code, FatalCode::InvalidFormat);
    }

    #[test]
    fn test_import_invalid_line_continues() {
        let data = "{\"kind\":\"icon\",\"content\":\"a\"}\nnot json\n{\"kind\":\"icon\",\"content\":\"c\"}\n";
        let rows = collect(ndjson_rows(input(data), &ctx()));
        assert_eq!(rows.len(), 3);
        assert!(matches!(&rows[1].row, Row::Error(e) if e.code == RowErrorCode::InvalidRecord));
        assert!(rows[2].row.is_asset());
    }

    #[test]
    fn test_import_oversized_line() {
        let ctx = ParseContext::new(
            Limits {
                entry_bytes: 40,
                ..Limits::default()
            },
            None,
        );
        let long = "x".repeat(100);
        let data = format!("{{\"kind\":\"a\",\"content\":\"{long}\"}}\n{{\"kind\":\"a\",\"content\":\"b\"}}\n");
        let rows = collect(ndjson_rows(input(&data), &ctx));
        assert!(matches!(&rows[0].row, Row::Error(e) if e.code == RowErrorCode::TooLarge));
        assert!(rows[1].row.is_asset());
    }

    #[test]
    fn test_line_at_cap_is_accepted() {
        let ctx = ParseContext::new(
            Limits {
                entry_bytes: 26,
                ..Limits::default()
            },
            None,
        );
        let exact = r#"{"kind":"a","content":"b"}"#;
        assert_eq!(exact.len(), 26);
        let data = format!("{exact}\n{exact}\r\n{{\"kind\":\"a\",\"content\":\"bc\"}}\n");
        let rows = collect(ndjson_rows(input(&data), &ctx));
        assert!(rows[0].row.is_asset());
        assert!(rows[1].row.is_asset());
        assert!(matches!(&rows[2].row, Row::Error(e) if e.code == RowErrorCode::TooLarge && e.ordinal == 3));
    }

    #[test]
    fn test_export_ndjson() {
        let mut sink = JsonExportSink::new();
        sink.write(&ExportAsset::new("1", "icon", "abc")).unwrap();
        sink.write(&ExportAsset::new("2", "icon", "def")).unwrap();
        let output = String::from_utf8(Box::new(sink).finalize().unwrap()).unwrap();

        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["kind"], "icon");
    }
}
