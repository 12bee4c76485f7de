//! YAML format adapter for import/export.
//!
//! Supports YAML document streams (multiple documents separated by `---`).
//! A document holding a sequence yields one record per element.

use crate::io::formats::{RecordFields, io_fatal, read_line_capped, terminator_len, too_large};
use crate::io::input::ReadSeek;
use crate::io::traits::{ExportSink, ParseContext, ParsedRow, RowIter};
use crate::models::{ExportAsset, FatalError, ParseError, Row, RowErrorCode};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader};

/// Opens a YAML document-stream parser.
#[must_use]
pub fn rows(reader: Box<dyn ReadSeek>, ctx: &ParseContext) -> RowIter {
    Box::new(YamlRows {
        reader: BufReader::new(reader),
        line: Vec::new(),
        document: String::new(),
        document_bytes: 0,
        carried: 0,
        oversized: false,
        pending: VecDeque::new(),
        ordinal: 0,
        ctx: ctx.clone(),
        done: false,
    })
}

/// Lazy YAML row parser.
///
/// Reads line by line and parses one document at a time, so only the
/// current document is held in memory.
struct YamlRows<R> {
    reader: R,
    line: Vec<u8>,
    document: String,
    document_bytes: u64,
    /// Bytes of empty documents, attributed to the next record.
    carried: u64,
    oversized: bool,
    /// Rows from a sequence document not yet yielded.
    pending: VecDeque<ParsedRow>,
    ordinal: u64,
    ctx: ParseContext,
    done: bool,
}

fn is_separator(line: &[u8]) -> bool {
    let line = line.trim_ascii_end();
    line == b"---" || line.starts_with(b"--- ")
}

impl<R: BufRead> YamlRows<R> {
    /// Reads up to the next separator. Returns `false` at end of input with
    /// nothing buffered.
    fn read_document(&mut self) -> std::io::Result<bool> {
        let cap = self.ctx.limits.entry_bytes;
        loop {
            let Some(line) = read_line_capped(&mut self.reader, &mut self.line, cap)? else {
                return Ok(self.document_bytes > 0);
            };
            self.document_bytes += line.consumed;
            if is_separator(&self.line) {
                return Ok(true);
            }
            let record_bytes = self.document_bytes.saturating_sub(terminator_len(&self.line));
            if line.truncated || record_bytes > cap {
                self.oversized = true;
            }
            if !self.oversized {
                self.document.push_str(&String::from_utf8_lossy(&self.line));
            }
        }
    }

    /// Parses the buffered document into `pending`.
    fn parse_document(&mut self) {
        let bytes = std::mem::take(&mut self.document_bytes) + std::mem::take(&mut self.carried);
        let document = std::mem::take(&mut self.document);
        let fallback = self.ctx.fallback_kind.clone();

        if std::mem::take(&mut self.oversized) {
            self.ordinal += 1;
            let row = too_large(self.ordinal, self.ctx.limits.entry_bytes);
            self.pending.push_back(ParsedRow::new(row, bytes));
            return;
        }

        let blank = document.lines().all(|line| {
            let line = line.trim();
            line.is_empty() || line.starts_with('#')
        });
        if blank {
            self.carried = bytes;
            return;
        }

        let values = match serde_yaml_ng::from_str::<Value>(&document) {
            Ok(Value::Null) => Vec::new(),
            Ok(Value::Array(items)) => items.into_iter().map(Ok).collect(),
            Ok(value) => vec![Ok(value)],
            Err(e) => vec![Err(e.to_string())],
        };

        if values.is_empty() {
            self.carried = bytes;
            return;
        }

        let mut bytes = Some(bytes);
        for value in values {
            self.ordinal += 1;
            let row = match value.and_then(RecordFields::from_value) {
                Ok(fields) => fields.into_row(self.ordinal, fallback.as_deref()),
                Err(detail) => Row::from(
                    ParseError::new(RowErrorCode::InvalidRecord, self.ordinal).with_detail(detail),
                ),
            };
            // The document's bytes go to its first record.
            self.pending
                .push_back(ParsedRow::new(row, bytes.take().unwrap_or_default()));
        }
    }
}

impl<R: BufRead + Send> Iterator for YamlRows<R> {
    type Item = std::result::Result<ParsedRow, FatalError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(row));
            }
            if self.done {
                return None;
            }
            match self.read_document() {
                Ok(true) => self.parse_document(),
                Ok(false) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(io_fatal(&e)));
                },
            }
        }
    }
}

/// YAML export sink.
///
/// Writes assets as a YAML document stream.
pub struct YamlExportSink {
    buffer: String,
    /// Whether any document has been written.
    started: bool,
}

impl YamlExportSink {
    /// Creates a new YAML export sink.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: String::new(),
            started: false,
        }
    }
}

impl Default for YamlExportSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportSink for YamlExportSink {
    fn write(&mut self, asset: &ExportAsset) -> Result<()> {
        let document =
            serde_yaml_ng::to_string(asset).map_err(|e| Error::operation("serialize_yaml", e))?;
        if self.started {
            self.buffer.push_str("---\n");
        }
        self.buffer.push_str(&document);
        self.started = true;
        Ok(())
    }

    fn take_chunk(&mut self) -> Result<Vec<u8>> {
        Ok(std::mem::take(&mut self.buffer).into_bytes())
    }

    fn finalize(self: Box<Self>) -> Result<Vec<u8>> {
        Ok(self.buffer.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use std::io::Cursor;

    fn parse(data: &str) -> Vec<ParsedRow> {
        let ctx = ParseContext::new(Limits::default(), None);
        rows(Box::new(Cursor::new(data.as_bytes().to_vec())), &ctx)
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_import_document_stream() {
        let data = "---\nkind: icon\ncontent: abc\n---\nkind: font\ncontent: def\n";
        let rows = parse(data);
        assert_eq!(rows.len(), 2);
        assert!(matches!(&rows[0].row, Row::Asset(a) if a.kind == "icon" && a.ordinal == 1));
        assert!(matches!(&rows[1].row, Row::Asset(a) if a.content == "def" && a.ordinal == 2));

        let total: u64 = rows.iter().map(|r| r.bytes).sum();
        assert_eq!(total, data.len() as u64);
    }

    #[test]
    fn test_import_sequence_document() {
        let data = "- kind: icon\n  content: a\n- kind: icon\n  content: b\n- plain string\n";
        let rows = parse(data);
        assert_eq!(rows.len(), 3);
        assert!(rows[1].row.is_asset());
        assert!(matches!(&rows[2].row, Row::Error(e) if e.code == RowErrorCode::InvalidRecord));
        assert_eq!(rows[0].bytes, data.len() as u64);
        assert_eq!(rows[1].bytes, 0);
    }

    #[test]
    fn test_import_bad_document_continues() {
        let data = "kind: icon\ncontent: [unclosed\n---\nkind: icon\ncontent: ok\n";
        let rows = parse(data);
        assert_eq!(rows.len(), 2);
        assert!(matches!(&rows[0].row, Row::Error(e) if e.code == RowErrorCode::InvalidRecord));
        assert!(rows[1].row.is_asset());
    }

    #[test]
    fn test_import_empty_documents_skipped() {
        let rows = parse("---\n---\n# comment\n---\nkind: icon\ncontent: x\n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row.ordinal(), 1);
    }

    #[test]
    fn test_export_yaml_stream() {
        let mut sink = YamlExportSink::new();
        sink.write(&ExportAsset::new("1", "icon", "123").with_created_at(7))
            .unwrap();
        sink.write(&ExportAsset::new("2", "icon", "true").with_created_at(7))
            .unwrap();
        let output = String::from_utf8(Box::new(sink).finalize().unwrap()).unwrap();

        assert_eq!(output.matches("---\n").count(), 1);
        let rows = parse(&output);
        assert!(matches!(&rows[0].row, Row::Asset(a) if a.content == "123"));
        assert!(matches!(&rows[1].row, Row::Asset(a) if a.content == "true"));
    }
}
