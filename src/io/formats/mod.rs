//! Format adapters for import/export.
//!
//! Each format provides a lazy row parser returning a [`RowIter`] and, where
//! export is supported, an [`ExportSink`].

pub mod csv;
pub mod json;
pub mod plain;
pub mod xlsx;
pub mod xml;
pub mod yaml;
pub mod zip;

use crate::io::codec::{Codec, Format};
use crate::io::input::TransferInput;
use crate::io::traits::{ExportSink, ParseContext, RowIter};
use crate::models::{Asset, FatalCode, FatalError, ParseError, Row, RowErrorCode};
use crate::{Error, Result};
use serde_json::Value;
use std::io::{self, BufRead};

/// Opens a lazy row parser for one input.
///
/// # Errors
///
/// Returns a [`FatalError`] if the input cannot be opened or its container
/// is unreadable.
pub fn open_rows(
    input: TransferInput,
    codec: &Codec,
    ctx: &ParseContext,
) -> std::result::Result<RowIter, FatalError> {
    let len = input.len().unwrap_or_default();
    let reader = input.open().map_err(|e| io_fatal(&e))?;
    match codec.format {
        Format::Csv | Format::Tsv => csv::rows(reader, codec.delimiter(), ctx),
        Format::Json => json::rows(reader, ctx),
        Format::Ndjson => Ok(json::ndjson_rows(reader, ctx)),
        Format::Yaml => Ok(yaml::rows(reader, ctx)),
        Format::Xml => Ok(xml::rows(reader, &codec.node_tag_names, ctx)),
        Format::Xlsx => xlsx::rows(reader, len, ctx),
        Format::Zip => zip::rows(reader, len, ctx),
        Format::Plain => Ok(plain::rows(reader, ctx)),
    }
}

/// Creates an export sink for the given format.
///
/// # Errors
///
/// Returns an error if the format doesn't support export.
pub fn create_export_sink(format: Format) -> Result<Box<dyn ExportSink>> {
    match format {
        Format::Csv => Ok(Box::new(csv::CsvExportSink::new(b','))),
        Format::Tsv => Ok(Box::new(csv::CsvExportSink::new(b'\t'))),
        Format::Json | Format::Ndjson => Ok(Box::new(json::JsonExportSink::new())),
        Format::Yaml => Ok(Box::new(yaml::YamlExportSink::new())),
        Format::Xml => Ok(Box::new(xml::XmlExportSink::new())),
        Format::Xlsx => Ok(Box::new(xlsx::XlsxExportSink::new()?)),
        Format::Zip => Ok(Box::new(zip::ZipExportSink::new())),
        Format::Plain => Err(Error::InvalidInput(
            "Format 'plain' does not support export".to_string(),
        )),
    }
}

/// Normalizes a field name: lowercase with `_`, `-` and whitespace removed.
///
/// `"Asset Type"`, `"asset_type"` and `"ASSET-TYPE"` all become `"assettype"`.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-') && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Asset fields collected from one source record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RecordFields {
    pub kind: Option<String>,
    pub content: Option<String>,
    pub name: Option<String>,
    pub hash: Option<String>,
}

/// Canonical field a normalized key maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    Kind,
    Content,
    Name,
    Hash,
}

impl Field {
    /// Maps a raw field name through the alias table.
    pub fn from_key(key: &str) -> Option<Self> {
        match normalize_key(key).as_str() {
            "kind" | "type" | "assettype" | "assetkind" => Some(Self::Kind),
            "content" | "body" | "data" | "text" | "value" => Some(Self::Content),
            "name" | "filename" | "assetname" | "title" => Some(Self::Name),
            "hash" | "sha256" | "checksum" | "contenthash" => Some(Self::Hash),
            _ => None,
        }
    }
}

impl RecordFields {
    /// Stores `value` under the field `key` aliases to. Unknown keys are ignored.
    pub fn set(&mut self, key: &str, value: String) {
        if let Some(field) = Field::from_key(key) {
            self.set_field(field, value);
        }
    }

    pub fn set_field(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Kind => &mut self.kind,
            Field::Content => &mut self.content,
            Field::Name => &mut self.name,
            Field::Hash => &mut self.hash,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    /// Collects fields from a JSON/YAML value.
    ///
    /// Scalars are stringified; nested structures become compact JSON.
    pub fn from_value(value: Value) -> std::result::Result<Self, String> {
        let Value::Object(map) = value else {
            return Err(format!("expected an object, found {}", value_type(&value)));
        };
        let mut fields = Self::default();
        for (key, value) in map {
            if let Some(text) = value_to_string(value) {
                fields.set(&key, text);
            }
        }
        Ok(fields)
    }

    /// Validates the record and builds a row.
    ///
    /// A blank kind falls back to `fallback`; without one the row is
    /// `MISSING_KIND`. A missing content field is `SCHEMA_MISMATCH`.
    pub fn into_row(self, ordinal: u64, fallback: Option<&str>) -> Row {
        let kind = self
            .kind
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .or_else(|| fallback.map(str::to_string));
        let Some(kind) = kind else {
            return ParseError::new(RowErrorCode::MissingKind, ordinal).into();
        };
        let Some(content) = self.content else {
            return ParseError::new(RowErrorCode::SchemaMismatch, ordinal)
                .with_detail("missing content field")
                .into();
        };
        let mut asset = Asset::new(ordinal, kind, content);
        asset.name = self.name.filter(|n| !n.is_empty());
        asset.hash = self.hash.filter(|h| !h.is_empty());
        asset.into()
    }
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        nested @ (Value::Array(_) | Value::Object(_)) => Some(nested.to_string()),
    }
}

const fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// One line read under a byte cap.
#[derive(Debug)]
pub(crate) struct CappedLine {
    /// Bytes consumed from the source, including the terminator.
    pub consumed: u64,
    /// Whether the line, without its terminator, exceeded the cap; `buf`
    /// then holds only a prefix.
    pub truncated: bool,
}

/// Length of the `\n` or `\r\n` terminator ending `line`, if any.
pub(crate) fn terminator_len(line: &[u8]) -> u64 {
    match line {
        [.., b'\r', b'\n'] => 2,
        [.., b'\n'] => 1,
        _ => 0,
    }
}

/// Reads one `\n`-terminated line into `buf`, keeping at most `cap` bytes
/// plus the terminator.
///
/// The cap applies to the line without its `\n` or `\r\n` terminator. The
/// rest of an oversized line is consumed and discarded, so memory stays
/// bounded by the cap. Returns `None` at end of input.
pub(crate) fn read_line_capped<R: BufRead + ?Sized>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    cap: u64,
) -> io::Result<Option<CappedLine>> {
    buf.clear();
    let limit = cap.saturating_add(2);
    let mut consumed = 0u64;
    let mut overflow = false;
    let finish = |buf: &[u8], consumed: u64, overflow: bool| CappedLine {
        consumed,
        truncated: overflow || buf.len() as u64 - terminator_len(buf) > cap,
    };
    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok((consumed > 0).then(|| finish(buf.as_slice(), consumed, overflow)));
        }
        let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (&available[..=i], true),
            None => (available, false),
        };
        let room = usize::try_from(limit.saturating_sub(buf.len() as u64)).unwrap_or(usize::MAX);
        if chunk.len() > room {
            overflow = true;
            buf.extend_from_slice(&chunk[..room]);
        } else {
            buf.extend_from_slice(chunk);
        }
        let used = chunk.len();
        consumed += used as u64;
        reader.consume(used);
        if done {
            return Ok(Some(finish(buf.as_slice(), consumed, overflow)));
        }
    }
}

/// Builds a `TOO_LARGE` row error.
pub(crate) fn too_large(ordinal: u64, cap: u64) -> Row {
    ParseError::new(RowErrorCode::TooLarge, ordinal)
        .with_detail(format!("record exceeds {cap} bytes"))
        .into()
}

/// Maps a read failure on the underlying input to a fatal parser error.
pub(crate) fn io_fatal(error: &io::Error) -> FatalError {
    FatalError::with_detail(FatalCode::ParserError, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_case::test_case;

    #[test_case("kind", Some(Field::Kind))]
    #[test_case("Asset Type", Some(Field::Kind))]
    #[test_case("ASSET_TYPE", Some(Field::Kind))]
    #[test_case("Body", Some(Field::Content))]
    #[test_case("file-name", Some(Field::Name))]
    #[test_case("SHA256", Some(Field::Hash))]
    #[test_case("created_at", None)]
    fn test_field_aliases(key: &str, expected: Option<Field>) {
        assert_eq!(Field::from_key(key), expected);
    }

    #[test]
    fn test_into_row_validation() {
        let mut fields = RecordFields::default();
        fields.set("content", "abc".to_string());
        let row = fields.clone().into_row(1, None);
        assert!(matches!(row, Row::Error(ref e) if e.code == RowErrorCode::MissingKind));

        let row = fields.into_row(1, Some("note"));
        assert!(matches!(row, Row::Asset(ref a) if a.kind == "note"));

        let mut fields = RecordFields::default();
        fields.set("kind", "icon".to_string());
        let row = fields.into_row(2, None);
        assert!(matches!(row, Row::Error(ref e) if e.code == RowErrorCode::SchemaMismatch));
    }

    #[test]
    fn test_first_alias_wins() {
        let mut fields = RecordFields::default();
        fields.set("kind", "icon".to_string());
        fields.set("type", "other".to_string());
        assert_eq!(fields.kind.as_deref(), Some("icon"));
    }

    #[test]
    fn test_from_value_stringifies() {
        let value = serde_json::json!({"kind": "cfg", "content": {"a": 1}, "name": null});
        let fields = RecordFields::from_value(value).unwrap();
        assert_eq!(fields.content.as_deref(), Some("{\"a\":1}"));
        assert!(fields.name.is_none());
        assert!(RecordFields::from_value(serde_json::json!([1])).is_err());
    }

    #[test]
    fn test_read_line_capped() {
        let mut reader = Cursor::new(b"short\nthis line is long\nend".to_vec());
        let mut buf = Vec::new();

        let line = read_line_capped(&mut reader, &mut buf, 8).unwrap().unwrap();
        assert_eq!(buf, b"short\n");
        assert!(!line.truncated);

        let line = read_line_capped(&mut reader, &mut buf, 8).unwrap().unwrap();
        assert!(line.truncated);
        assert_eq!(line.consumed, 18);
        assert_eq!(buf.len(), 10);

        let line = read_line_capped(&mut reader, &mut buf, 8).unwrap().unwrap();
        assert_eq!(buf, b"end");
        assert_eq!(line.consumed, 3);

        assert!(read_line_capped(&mut reader, &mut buf, 8).unwrap().is_none());
    }

    #[test]
    fn test_line_cap_excludes_terminator() {
        let mut reader = Cursor::new(b"12345678\n12345678\r\n123456789\n12345678".to_vec());
        let mut buf = Vec::new();
        let mut truncated = Vec::new();
        while let Some(line) = read_line_capped(&mut reader, &mut buf, 8).unwrap() {
            truncated.push(line.truncated);
        }
        assert_eq!(truncated, vec![false, false, true, false]);
    }
}
