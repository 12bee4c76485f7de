//! XLSX format adapter for import/export.
//!
//! A workbook is a ZIP of XML parts. Import reads the shared-string table
//! through the archive guard, then inflates the first worksheet on demand and
//! walks its `<row>` elements as they stream in. Row 1 is the header; columns
//! B..E hold kind, content, name and hash.
//!
//! Export writes a minimal single-sheet workbook with inline strings, so no
//! shared-string table is needed.

use crate::io::archive::{ArchiveGuard, EntryError, GuardedReader};
use crate::io::formats::RecordFields;
use crate::io::input::ReadSeek;
use crate::io::traits::{ExportSink, ParseContext, ParsedRow, RowIter};
use crate::models::{ExportAsset, FatalCode, FatalError, ParseError, Row, RowErrorCode};
use crate::{Error, Result};
use flate2::read::DeflateDecoder;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom, Write};
use zip::result::ZipError;
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::{CompressionMethod, ZipArchive};

const SHARED_STRINGS: &str = "xl/sharedStrings.xml";
const FIRST_SHEET: &str = "xl/worksheets/sheet1.xml";

/// Column headers written on export.
pub const EXPORT_HEADERS: [&str; 5] = ["id", "kind", "content", "name", "hash"];

/// Columns always written on export, even when empty.
const REQUIRED_COLUMNS: [usize; 2] = [2, 3];

type SheetSource = GuardedReader<Box<dyn Read + Send>>;

/// Opens a workbook parser.
///
/// # Errors
///
/// Returns `INVALID_FORMAT` for a corrupt workbook, `UNSUPPORTED` for a sheet
/// compressed with anything but deflate, or the guard's fatal error when the
/// shared strings inflate past the archive limits.
pub fn rows(
    reader: Box<dyn ReadSeek>,
    archive_len: u64,
    ctx: &ParseContext,
) -> std::result::Result<RowIter, FatalError> {
    let mut archive = ZipArchive::new(reader).map_err(|e| invalid_workbook(&e))?;
    // Parts hold every row, so they get the archive-wide cap.
    let mut guard =
        ArchiveGuard::new(&ctx.limits, archive_len).with_entry_cap(ctx.limits.total_bytes);

    let shared = match read_part(&mut archive, &mut guard, SHARED_STRINGS)? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let sheet_name = first_sheet(&archive).ok_or_else(|| {
        FatalError::with_detail(FatalCode::InvalidFormat, "workbook has no worksheet")
    })?;
    let (sheet, sheet_len) = open_sheet(archive, &sheet_name)?;

    // Progress is reported in compressed bytes: each row gets its share.
    let scale = archive_len as f64 / sheet_len.max(1) as f64;

    Ok(Box::new(SheetRows {
        reader: Reader::from_reader(BufReader::new(GuardedReader::new(sheet, guard))),
        buf: Vec::new(),
        shared,
        scale,
        reported: 0,
        ordinal: 0,
        seen_rows: 0,
        next_row: None,
        ctx: ctx.clone(),
        done: false,
    }))
}

fn invalid_workbook(error: &ZipError) -> FatalError {
    FatalError::with_detail(FatalCode::InvalidFormat, format!("corrupt workbook: {error}"))
}

fn first_sheet<R: Read + Seek>(archive: &ZipArchive<R>) -> Option<String> {
    let mut sheets: Vec<&str> = archive
        .file_names()
        .filter(|name| name.starts_with("xl/worksheets/") && name.ends_with(".xml"))
        .collect();
    if sheets.contains(&FIRST_SHEET) {
        return Some(FIRST_SHEET.to_string());
    }
    sheets.sort_unstable();
    sheets.first().map(|name| (*name).to_string())
}

/// Takes ownership of the archive reader and positions a decoder on the
/// sheet's compressed data. Returns the decoder and the inflated length.
fn open_sheet(
    mut archive: ZipArchive<Box<dyn ReadSeek>>,
    name: &str,
) -> std::result::Result<(Box<dyn Read + Send>, u64), FatalError> {
    let (data_start, compressed, size, method) = {
        let file = archive.by_name(name).map_err(|e| match e {
            ZipError::FileNotFound => {
                FatalError::with_detail(FatalCode::InvalidFormat, format!("missing {name}"))
            },
            e => invalid_workbook(&e),
        })?;
        (file.data_start(), file.compressed_size(), file.size(), file.compression())
    };

    let mut inner = archive.into_inner();
    inner.seek(SeekFrom::Start(data_start)).map_err(|e| {
        FatalError::with_detail(FatalCode::InvalidFormat, format!("{name}: {e}"))
    })?;
    let raw = inner.take(compressed);
    let decoder: Box<dyn Read + Send> = match method {
        CompressionMethod::Stored => Box::new(raw),
        CompressionMethod::Deflated => Box::new(DeflateDecoder::new(raw)),
        other => {
            return Err(FatalError::with_detail(
                FatalCode::Unsupported,
                format!("{name} uses compression {other:?}"),
            ));
        },
    };
    Ok((decoder, size))
}

fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    guard: &mut ArchiveGuard,
    name: &str,
) -> std::result::Result<Option<Vec<u8>>, FatalError> {
    let file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(invalid_workbook(&e)),
    };
    match guard.read_entry(file)? {
        Ok(bytes) => Ok(Some(bytes)),
        Err(EntryError::TooLarge { .. }) => Err(FatalError::with_detail(
            FatalCode::ArchiveLimit,
            format!("{name} exceeds {} bytes", guard.entry_cap()),
        )),
        Err(EntryError::Io(e)) => Err(FatalError::with_detail(
            FatalCode::InvalidFormat,
            format!("{name}: {e}"),
        )),
    }
}

/// Parses `<si>` entries; rich-text runs are concatenated.
fn parse_shared_strings(xml: &[u8]) -> std::result::Result<Vec<String>, FatalError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    loop {
        buf.clear();
        let event = reader.read_event_into(&mut buf).map_err(|e| {
            FatalError::with_detail(FatalCode::InvalidFormat, format!("{SHARED_STRINGS}: {e}"))
        })?;
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {},
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(text) if in_text => {
                if let (Some(current), Ok(text)) = (current.as_mut(), text.unescape()) {
                    current.push_str(&text);
                }
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_text = false,
                _ => {},
            },
            Event::Eof => break,
            _ => {},
        }
    }
    Ok(strings)
}

/// Converts the letters of a cell reference (`C12`) to a 1-based column.
fn column_index(reference: &[u8]) -> Option<usize> {
    let letters = reference.iter().take_while(|b| b.is_ascii_alphabetic());
    let mut column = 0usize;
    let mut any = false;
    for letter in letters {
        column = column * 26 + usize::from(letter.to_ascii_uppercase() - b'A' + 1);
        any = true;
    }
    any.then_some(column)
}

/// Converts a 1-based column to letters.
fn column_letters(mut column: usize) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        let rem = (column - 1) % 26;
        letters.push(b'A' + u8::try_from(rem).unwrap_or_default());
        column = (column - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// A cell being read.
#[derive(Debug, Default)]
struct Cell {
    column: usize,
    kind: Option<String>,
    value: String,
}

/// Lazy worksheet row parser.
struct SheetRows {
    reader: Reader<BufReader<SheetSource>>,
    buf: Vec<u8>,
    shared: Vec<String>,
    scale: f64,
    reported: u64,
    ordinal: u64,
    seen_rows: u64,
    /// A `<row>` opened while an earlier one was still unterminated.
    next_row: Option<SheetRow>,
    ctx: ParseContext,
    done: bool,
}

/// Cells of one `<row>` element.
#[derive(Debug, Default)]
struct SheetRow {
    number: Option<u64>,
    cells: Vec<(usize, String)>,
    error: Option<String>,
}

impl SheetRows {
    fn consumed(&mut self) -> u64 {
        let position = self.reader.buffer_position();
        let scaled = (position as f64 * self.scale) as u64;
        let bytes = scaled.saturating_sub(self.reported);
        self.reported = scaled.max(self.reported);
        bytes
    }

    fn tripped(&self) -> Option<FatalError> {
        self.reader.get_ref().get_ref().tripped().cloned()
    }

    fn start_row(start: &BytesStart<'_>) -> SheetRow {
        let number = start
            .try_get_attribute("r")
            .ok()
            .flatten()
            .and_then(|attr| std::str::from_utf8(&attr.value).ok()?.parse().ok());
        SheetRow {
            number,
            ..SheetRow::default()
        }
    }

    fn start_cell(start: &BytesStart<'_>, previous: usize) -> Cell {
        let mut cell = Cell {
            column: previous + 1,
            ..Cell::default()
        };
        for attr in start.attributes().flatten() {
            match attr.key.local_name().as_ref() {
                b"r" => {
                    if let Some(column) = column_index(&attr.value) {
                        cell.column = column;
                    }
                },
                b"t" => cell.kind = Some(String::from_utf8_lossy(&attr.value).into_owned()),
                _ => {},
            }
        }
        cell
    }

    fn resolve(&self, cell: Cell) -> std::result::Result<String, String> {
        match cell.kind.as_deref() {
            Some("s") => {
                let index: usize = cell
                    .value
                    .trim()
                    .parse()
                    .map_err(|_| format!("bad shared string index '{}'", cell.value))?;
                self.shared
                    .get(index)
                    .cloned()
                    .ok_or_else(|| format!("shared string {index} out of range"))
            },
            Some("b") => Ok(if cell.value.trim() == "1" { "TRUE" } else { "FALSE" }.to_string()),
            _ => Ok(cell.value),
        }
    }

    /// Reads the next `<row>` element. `Ok(None)` at end of sheet.
    ///
    /// Malformed markup inside a row marks that row as failed and reading
    /// resumes at the next row boundary. Markup the reader cannot move past
    /// is fatal.
    fn read_row(&mut self) -> std::result::Result<Option<SheetRow>, FatalError> {
        let mut row = self.next_row.take();
        let mut cell: Option<Cell> = None;
        let mut capture = false;
        let mut last_column = 0;

        loop {
            self.buf.clear();
            let before = self.reader.buffer_position();
            let read = self.reader.read_event_into(&mut self.buf).map(Event::into_owned);
            let event = match read {
                Ok(event) => event,
                Err(e) => {
                    if let Some(fatal) = self.tripped() {
                        return Err(fatal);
                    }
                    if self.reader.buffer_position() == before {
                        return Err(FatalError::with_detail(
                            FatalCode::ParserError,
                            format!("worksheet: {e}"),
                        ));
                    }
                    row.get_or_insert_with(SheetRow::default)
                        .error
                        .get_or_insert_with(|| e.to_string());
                    cell = None;
                    capture = false;
                    continue;
                },
            };
            match event {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"row" => {
                        if let Some(open) = row.replace(Self::start_row(&e)) {
                            self.next_row = row.take();
                            return Ok(Some(open));
                        }
                        last_column = 0;
                    },
                    b"c" if row.is_some() => {
                        let next = Self::start_cell(&e, last_column);
                        last_column = next.column;
                        cell = Some(next);
                    },
                    b"v" | b"t" if cell.is_some() => capture = true,
                    _ => {},
                },
                Event::Empty(e) => match e.local_name().as_ref() {
                    b"row" => {
                        let empty = Self::start_row(&e);
                        if let Some(open) = row.take() {
                            self.next_row = Some(empty);
                            return Ok(Some(open));
                        }
                        return Ok(Some(empty));
                    },
                    b"c" if row.is_some() => last_column = Self::start_cell(&e, last_column).column,
                    _ => {},
                },
                Event::Text(text) if capture => {
                    if let (Some(open), Some(row)) = (cell.as_mut(), row.as_mut()) {
                        match text.unescape() {
                            Ok(text) => open.value.push_str(&text),
                            Err(e) => {
                                row.error.get_or_insert_with(|| e.to_string());
                            },
                        }
                    }
                },
                Event::End(e) => match e.local_name().as_ref() {
                    b"v" | b"t" => capture = false,
                    b"c" => {
                        if let (Some(done), Some(row)) = (cell.take(), row.as_mut()) {
                            let column = done.column;
                            match self.resolve(done) {
                                Ok(value) => row.cells.push((column, value)),
                                Err(detail) => {
                                    row.error.get_or_insert(detail);
                                },
                            }
                        }
                    },
                    b"row" => {
                        if row.is_some() {
                            return Ok(row.take());
                        }
                    },
                    _ => {},
                },
                Event::Eof => return Ok(row.take()),
                _ => {},
            }
        }
    }

    fn build(&self, row: SheetRow, ordinal: u64) -> Row {
        if let Some(detail) = row.error {
            return ParseError::new(RowErrorCode::InvalidRecord, ordinal)
                .with_detail(detail)
                .into();
        }
        let mut fields = RecordFields::default();
        for (column, value) in row.cells {
            let slot = match column {
                2 => &mut fields.kind,
                3 => &mut fields.content,
                4 => &mut fields.name,
                5 => &mut fields.hash,
                _ => continue,
            };
            *slot = Some(value);
        }
        fields.into_row(ordinal, self.ctx.fallback())
    }
}

impl Iterator for SheetRows {
    type Item = std::result::Result<ParsedRow, FatalError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let row = match self.read_row() {
                Ok(Some(row)) => row,
                Ok(None) => {
                    self.done = true;
                    break;
                },
                Err(fatal) => {
                    self.done = true;
                    return Some(Err(fatal));
                },
            };
            self.seen_rows += 1;
            let is_header = row.number.map_or(self.seen_rows == 1, |n| n == 1);
            let blank = row.cells.iter().all(|(_, v)| v.trim().is_empty()) && row.error.is_none();
            if (is_header && row.error.is_none()) || blank {
                continue;
            }

            self.ordinal += 1;
            let bytes = self.consumed();
            let parsed = self.build(row, self.ordinal);
            return Some(Ok(ParsedRow::new(parsed, bytes)));
        }
        None
    }
}

/// XLSX export sink.
///
/// Streams rows into the sheet part of an in-memory workbook.
pub struct XlsxExportSink {
    zip: ZipWriter<Cursor<Vec<u8>>>,
    rows: usize,
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Assets" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

const SHEET_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#;

const SHEET_TAIL: &str = "</sheetData></worksheet>";

impl XlsxExportSink {
    /// Creates a workbook and writes the header row.
    ///
    /// # Errors
    ///
    /// Returns an error if the package parts cannot be written.
    pub fn new() -> Result<Self> {
        let mut sink = Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
            rows: 0,
        };
        for (name, body) in [
            ("[Content_Types].xml", CONTENT_TYPES),
            ("_rels/.rels", ROOT_RELS),
            ("xl/workbook.xml", WORKBOOK),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
        ] {
            sink.zip
                .start_file(name, SimpleFileOptions::default())
                .map_err(|e| Error::operation("write_xlsx", e))?;
            sink.put(body)?;
        }
        sink.zip
            .start_file(FIRST_SHEET, SimpleFileOptions::default())
            .map_err(|e| Error::operation("write_xlsx", e))?;
        sink.put(SHEET_HEAD)?;
        sink.put_row(&EXPORT_HEADERS)?;
        Ok(sink)
    }

    fn put(&mut self, text: &str) -> Result<()> {
        self.zip
            .write_all(text.as_bytes())
            .map_err(|e| Error::operation("write_xlsx", e))
    }

    fn put_row(&mut self, values: &[&str]) -> Result<()> {
        self.rows += 1;
        let number = self.rows;
        let mut xml = format!("<row r=\"{number}\">");
        for (i, value) in values.iter().enumerate() {
            if value.is_empty() && !REQUIRED_COLUMNS.contains(&(i + 1)) {
                continue;
            }
            xml.push_str(&format!(
                "<c r=\"{}{number}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
                column_letters(i + 1),
                escape(*value)
            ));
        }
        xml.push_str("</row>");
        self.put(&xml)
    }
}

impl ExportSink for XlsxExportSink {
    fn write(&mut self, asset: &ExportAsset) -> Result<()> {
        self.put_row(&[
            asset.id.as_str(),
            &asset.kind,
            &asset.content,
            asset.name.as_deref().unwrap_or(""),
            asset.hash.as_deref().unwrap_or(""),
        ])
    }

    fn take_chunk(&mut self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn finalize(mut self: Box<Self>) -> Result<Vec<u8>> {
        self.put(SHEET_TAIL)?;
        let cursor = self
            .zip
            .finish()
            .map_err(|e| Error::operation("finish_xlsx", e))?;
        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;

    fn parse(data: Vec<u8>) -> Vec<ParsedRow> {
        let ctx = ParseContext::new(Limits::default(), None);
        let len = data.len() as u64;
        rows(Box::new(Cursor::new(data)), len, &ctx)
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    /// Builds a workbook by hand with a shared-string table.
    fn workbook(sheet_rows: &str, shared: &str) -> Vec<u8> {
        workbook_with(sheet_rows, shared, SimpleFileOptions::default())
    }

    fn workbook_with(sheet_rows: &str, shared: &str, options: SimpleFileOptions) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("[Content_Types].xml", options).unwrap();
        zip.write_all(CONTENT_TYPES.as_bytes()).unwrap();
        zip.start_file(SHARED_STRINGS, options).unwrap();
        zip.write_all(format!("<sst>{shared}</sst>").as_bytes()).unwrap();
        zip.start_file(FIRST_SHEET, options).unwrap();
        zip.write_all(format!("{SHEET_HEAD}{sheet_rows}{SHEET_TAIL}").as_bytes())
            .unwrap();
        zip.finish().unwrap().into_inner()
    }

    #[test]
    fn test_column_conversions() {
        assert_eq!(column_index(b"A1"), Some(1));
        assert_eq!(column_index(b"e7"), Some(5));
        assert_eq!(column_index(b"AA10"), Some(27));
        assert_eq!(column_index(b"12"), None);
        assert_eq!(column_letters(1), "A");
        assert_eq!(column_letters(28), "AB");
    }

    #[test]
    fn test_import_shared_strings() {
        let shared = "<si><t>icon</t></si><si><r><t>ab</t></r><r><t>c</t></r></si>";
        let sheet = concat!(
            r#"<row r="1"><c r="A1" t="inlineStr"><is><t>id</t></is></c></row>"#,
            r#"<row r="2"><c r="A2"><v>7</v></c><c r="B2" t="s"><v>0</v></c><c r="C2" t="s"><v>1</v></c></row>"#,
            r#"<row r="3"><c r="B3" t="s"><v>0</v></c><c r="C3" t="s"><v>9</v></c></row>"#,
            r#"<row r="4"><c r="C4" t="inlineStr"><is><t>orphan</t></is></c></row>"#,
        );
        let rows = parse(workbook(sheet, shared));
        assert_eq!(rows.len(), 3);
        assert!(matches!(&rows[0].row, Row::Asset(a) if a.kind == "icon" && a.content == "abc" && a.ordinal == 1));
        assert!(matches!(&rows[1].row, Row::Error(e) if e.code == RowErrorCode::InvalidRecord && e.ordinal == 2));
        assert!(matches!(&rows[2].row, Row::Error(e) if e.code == RowErrorCode::MissingKind));
    }

    #[test]
    fn test_import_skips_blank_rows() {
        let sheet = concat!(
            r#"<row r="1"/>"#,
            r#"<row r="2"><c r="B2" t="inlineStr"><is><t>doc</t></is></c><c r="C2"><v>42</v></c></row>"#,
            r#"<row r="3"><c r="B3" t="inlineStr"><is><t> </t></is></c></row>"#,
        );
        let rows = parse(workbook(sheet, ""));
        assert_eq!(rows.len(), 1);
        assert!(matches!(&rows[0].row, Row::Asset(a) if a.content == "42"));
    }

    #[test]
    fn test_corrupt_workbook_is_fatal() {
        let ctx = ParseContext::new(Limits::default(), None);
        let Err(err) = rows(Box::new(Cursor::new(b"PK\x03\x04junk".to_vec())), 8, &ctx) else {
            panic!("expected fatal error");
        };
        assert_eq!(err.code, FatalCode::InvalidFormat);
    }

    #[test]
    fn test_export_then_import() {
        let mut sink = XlsxExportSink::new().unwrap();
        sink.write(&ExportAsset::new("a1", "icon", "  <svg/> & text  ").with_name("star.svg"))
            .unwrap();
        sink.write(&ExportAsset::new("a2", "font", "Fira")).unwrap();
        assert!(sink.take_chunk().unwrap().is_empty());
        let data = Box::new(sink).finalize().unwrap();
        assert!(data.starts_with(b"PK"));

        let rows = parse(data);
        assert_eq!(rows.len(), 2);
        assert!(matches!(&rows[0].row, Row::Asset(a) if a.content == "  <svg/> & text  " && a.name.as_deref() == Some("star.svg")));
        assert!(matches!(&rows[1].row, Row::Asset(a) if a.kind == "font" && a.ordinal == 2));
    }

    #[test]
    fn test_malformed_row_does_not_end_sheet() {
        let sheet = concat!(
            r#"<row r="1"><c r="A1" t="inlineStr"><is><t>id</t></is></c></row>"#,
            r#"<row r="2"><c r="B2" t="inlineStr"><is><t>icon</t></is></x></row>"#,
            r#"<row r="3"><c r="B3" t="inlineStr"><is><t>&bogus;</t></is></c></row>"#,
            r#"<row r="4"><c r="B4" t="inlineStr"><is><t>font</t></is></c><c r="C4"><v>ok</v></c></row>"#,
        );
        let rows = parse(workbook(sheet, ""));
        assert_eq!(rows.len(), 3);
        assert!(matches!(&rows[0].row, Row::Error(e) if e.code == RowErrorCode::InvalidRecord && e.ordinal == 1));
        assert!(matches!(&rows[1].row, Row::Error(e) if e.code == RowErrorCode::InvalidRecord && e.ordinal == 2));
        assert!(matches!(&rows[2].row, Row::Asset(a) if a.kind == "font" && a.content == "ok" && a.ordinal == 3));
    }

    #[test]
    fn test_stored_sheet_is_streamed() {
        let sheet = r#"<row r="2"><c r="B2" t="inlineStr"><is><t>doc</t></is></c><c r="C2"><v>1</v></c></row>"#;
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let rows = parse(workbook_with(sheet, "", options));
        assert_eq!(rows.len(), 1);
        assert!(matches!(&rows[0].row, Row::Asset(a) if a.kind == "doc"));
    }

    #[test]
    fn test_sheet_past_total_cap_is_fatal_while_streaming() {
        let row = r#"<row><c r="B2" t="inlineStr"><is><t>doc</t></is></c><c r="C2"><v>1</v></c></row>"#;
        let data = workbook(&row.repeat(200), "");
        let ctx = ParseContext::new(
            Limits {
                total_bytes: 4096,
                ..Limits::default()
            },
            None,
        );
        let len = data.len() as u64;
        let results: Vec<_> = rows(Box::new(Cursor::new(data)), len, &ctx).unwrap().collect();
        assert!(results.iter().take(results.len() - 1).all(std::result::Result::is_ok));
        let Some(Err(fatal)) = results.last() else {
            panic!("expected the sheet to trip the archive cap");
        };
        assert_eq!(fatal.code, FatalCode::ArchiveLimit);
    }

    #[test]
    fn test_empty_content_survives_export() {
        let mut sink = XlsxExportSink::new().unwrap();
        sink.write(&ExportAsset::new("a1", "icon", "")).unwrap();
        sink.write(&ExportAsset::new("a2", "icon", "x")).unwrap();
        let rows = parse(Box::new(sink).finalize().unwrap());

        assert_eq!(rows.len(), 2);
        assert!(matches!(&rows[0].row, Row::Asset(a) if a.kind == "icon" && a.content.is_empty()));
        assert!(matches!(&rows[1].row, Row::Asset(a) if a.content == "x"));
    }
}
