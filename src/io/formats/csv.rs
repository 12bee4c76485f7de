//! CSV/TSV format adapter for import/export.
//!
//! The header row names the fields; names are normalized and matched against
//! the alias table, so `Asset Type` and `asset_type` both map to `kind`.

use crate::io::formats::{Field, RecordFields, io_fatal, too_large};
use crate::io::input::ReadSeek;
use crate::io::traits::{ExportSink, ParseContext, ParsedRow, RowIter};
use crate::models::{ExportAsset, FatalCode, FatalError, ParseError, RowErrorCode};
use crate::{Error, Result};

/// Column headers written on export.
pub const EXPORT_HEADERS: [&str; 6] = ["id", "kind", "content", "name", "hash", "created_at"];

/// Maps CSV column indices to asset fields.
#[derive(Debug, Default)]
struct ColumnMap {
    columns: Vec<Option<Field>>,
}

impl ColumnMap {
    /// Creates a column map from CSV headers.
    fn from_headers(headers: &csv::StringRecord) -> Self {
        Self {
            columns: headers.iter().map(Field::from_key).collect(),
        }
    }

    fn fields(&self, record: &csv::StringRecord) -> RecordFields {
        let mut fields = RecordFields::default();
        for (field, value) in self.columns.iter().zip(record.iter()) {
            if let Some(field) = field {
                fields.set_field(*field, value.to_string());
            }
        }
        fields
    }
}

/// Lazy CSV row parser.
struct CsvRows {
    reader: csv::Reader<Box<dyn ReadSeek>>,
    column_map: ColumnMap,
    record: csv::StringRecord,
    ordinal: u64,
    position: u64,
    /// Header row bytes, reported with the first record.
    header_bytes: u64,
    ctx: ParseContext,
    done: bool,
}

/// Opens a CSV parser with the given field delimiter.
///
/// # Errors
///
/// Returns `INVALID_FORMAT` if the header row cannot be read.
pub fn rows(
    reader: Box<dyn ReadSeek>,
    delimiter: u8,
    ctx: &ParseContext,
) -> std::result::Result<RowIter, FatalError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true) // Allow varying number of fields
        .delimiter(delimiter)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| FatalError::with_detail(FatalCode::InvalidFormat, format!("header: {e}")))?
        .clone();
    let position = reader.position().byte();

    Ok(Box::new(CsvRows {
        reader,
        column_map: ColumnMap::from_headers(&headers),
        record: csv::StringRecord::new(),
        ordinal: 0,
        position,
        header_bytes: position,
        ctx: ctx.clone(),
        done: false,
    }))
}

/// Size of a record without its terminator: field bytes plus separators.
/// Quoting is not counted.
fn record_len(record: &csv::StringRecord) -> u64 {
    (record.as_slice().len() + record.len().saturating_sub(1)) as u64
}

impl CsvRows {
    fn consumed(&mut self) -> u64 {
        let position = self.reader.position().byte();
        let bytes = position.saturating_sub(self.position);
        self.position = position;
        bytes
    }
}

impl Iterator for CsvRows {
    type Item = std::result::Result<ParsedRow, FatalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read_record(&mut self.record) {
            Ok(false) => {
                self.done = true;
                None
            },
            Ok(true) => {
                self.ordinal += 1;
                let bytes = self.consumed();
                let row = if record_len(&self.record) > self.ctx.limits.entry_bytes {
                    too_large(self.ordinal, self.ctx.limits.entry_bytes)
                } else {
                    self.column_map
                        .fields(&self.record)
                        .into_row(self.ordinal, self.ctx.fallback())
                };
                let bytes = bytes + std::mem::take(&mut self.header_bytes);
                Some(Ok(ParsedRow::new(row, bytes)))
            },
            Err(e) => {
                if let csv::ErrorKind::Io(io) = e.kind() {
                    self.done = true;
                    return Some(Err(io_fatal(io)));
                }
                self.ordinal += 1;
                let bytes = self.consumed();
                let error = ParseError::new(RowErrorCode::InvalidRecord, self.ordinal)
                    .with_detail(e.to_string());
                let bytes = bytes + std::mem::take(&mut self.header_bytes);
                Some(Ok(ParsedRow::new(error, bytes)))
            },
        }
    }
}

/// CSV export sink.
///
/// Writes assets as CSV with a single header row.
pub struct CsvExportSink {
    writer: csv::Writer<Vec<u8>>,
    delimiter: u8,
    /// Whether headers have been written.
    headers_written: bool,
}

impl CsvExportSink {
    /// Creates a new CSV export sink with the given delimiter.
    #[must_use]
    pub fn new(delimiter: u8) -> Self {
        Self {
            writer: Self::buffer_writer(delimiter),
            delimiter,
            headers_written: false,
        }
    }

    fn buffer_writer(delimiter: u8) -> csv::Writer<Vec<u8>> {
        csv::WriterBuilder::new()
            .has_headers(false) // We write headers manually
            .delimiter(delimiter)
            .from_writer(Vec::new())
    }

    /// Writes headers if not already written.
    fn ensure_headers(&mut self) -> Result<()> {
        if !self.headers_written {
            self.writer
                .write_record(EXPORT_HEADERS)
                .map_err(|e| Error::operation("write_csv_headers", e))?;
            self.headers_written = true;
        }
        Ok(())
    }
}

impl ExportSink for CsvExportSink {
    fn write(&mut self, asset: &ExportAsset) -> Result<()> {
        self.ensure_headers()?;

        self.writer
            .write_record([
                asset.id.as_str(),
                &asset.kind,
                &asset.content,
                asset.name.as_deref().unwrap_or(""),
                asset.hash.as_deref().unwrap_or(""),
                &asset.created_at.to_string(),
            ])
            .map_err(|e| Error::operation("write_csv", e))?;

        Ok(())
    }

    fn take_chunk(&mut self) -> Result<Vec<u8>> {
        let full = std::mem::replace(&mut self.writer, Self::buffer_writer(self.delimiter));
        full.into_inner()
            .map_err(|e| Error::operation("flush_csv", e.error()))
    }

    fn finalize(mut self: Box<Self>) -> Result<Vec<u8>> {
        self.ensure_headers()?;
        self.take_chunk()
    }
}
