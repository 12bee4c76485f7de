//! Format descriptors and detection.
//!
//! A [`Codec`] is resolved once per input, by file extension first and by
//! sniffing the leading bytes when the extension is missing or ambiguous.

use crate::config::TransferConfig;
use crate::io::input::{SNIFF_BYTES, TransferInput};
use crate::models::{FatalCode, FatalError};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Supported wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Comma-separated values with a header row.
    Csv,
    /// Tab-separated values with a header row.
    Tsv,
    /// A JSON array of objects, or newline-delimited objects.
    Json,
    /// One JSON object per line.
    Ndjson,
    /// `---` separated YAML documents.
    Yaml,
    /// XML with allow-listed asset elements.
    Xml,
    /// Spreadsheet workbook; the first sheet holds the assets.
    Xlsx,
    /// ZIP archive, with or without `manifest.json`.
    Zip,
    /// Raw text; the whole input is a single asset.
    Plain,
}

/// Structural class of a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecClass {
    /// Rows separated by a delimiter, fields named by a header.
    Delimited,
    /// A sequence of self-contained records.
    Stream,
    /// A document tree walked for record elements.
    Tree,
    /// A compressed container.
    Archive,
    /// No structure at all.
    None,
}

/// Library used to open an archive format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveLib {
    /// Plain ZIP reader.
    Zip,
    /// Workbook reader layered on ZIP.
    Xlsx,
}

impl Format {
    /// Returns every format.
    #[must_use]
    pub const fn all() -> [Self; 9] {
        [
            Self::Csv,
            Self::Tsv,
            Self::Json,
            Self::Ndjson,
            Self::Yaml,
            Self::Xml,
            Self::Xlsx,
            Self::Zip,
            Self::Plain,
        ]
    }

    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Json => "json",
            Self::Ndjson => "ndjson",
            Self::Yaml => "yaml",
            Self::Xml => "xml",
            Self::Xlsx => "xlsx",
            Self::Zip => "zip",
            Self::Plain => "plain",
        }
    }

    /// Returns the file extension for this format.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Plain => "txt",
            other => other.as_str(),
        }
    }

    /// Returns the MIME type for this format.
    #[must_use]
    pub const fn mime_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Tsv => "text/tab-separated-values",
            Self::Json => "application/json",
            Self::Ndjson => "application/x-ndjson",
            Self::Yaml => "application/x-yaml",
            Self::Xml => "application/xml",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Zip => "application/zip",
            Self::Plain => "text/plain",
        }
    }

    /// Returns the structural class.
    #[must_use]
    pub const fn class(&self) -> CodecClass {
        match self {
            Self::Csv | Self::Tsv => CodecClass::Delimited,
            Self::Json | Self::Ndjson | Self::Yaml => CodecClass::Stream,
            Self::Xml => CodecClass::Tree,
            Self::Xlsx | Self::Zip => CodecClass::Archive,
            Self::Plain => CodecClass::None,
        }
    }

    /// Returns whether export produces a binary artifact rather than text chunks.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Xlsx | Self::Zip)
    }

    /// Returns whether this format supports export.
    #[must_use]
    pub const fn supports_export(&self) -> bool {
        !matches!(self, Self::Plain)
    }

    /// Looks up a format by file extension or alias.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "tsv" | "tab" => Some(Self::Tsv),
            "json" => Some(Self::Json),
            "ndjson" | "jsonl" => Some(Self::Ndjson),
            "yaml" | "yml" => Some(Self::Yaml),
            "xml" => Some(Self::Xml),
            "xlsx" => Some(Self::Xlsx),
            "zip" => Some(Self::Zip),
            "txt" | "text" | "plain" => Some(Self::Plain),
            _ => None,
        }
    }

    /// Detects format from a file path's extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the extension is missing or not recognized.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => Self::from_extension(ext).ok_or_else(|| {
                Error::InvalidInput(format!("Unsupported file extension: .{ext}"))
            }),
            None => Err(Error::InvalidInput(
                "Cannot determine format: file has no extension".to_string(),
            )),
        }
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_extension(s).ok_or_else(|| Error::InvalidInput(format!("Unknown format: {s}")))
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved format descriptor for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    /// The wire format.
    pub format: Format,
    /// Canonical extension.
    pub ext: &'static str,
    /// Structural class.
    pub class: CodecClass,
    /// Record separator for delimited and stream formats.
    pub separator: Option<&'static str>,
    /// Element names that open an asset (tree formats only).
    pub node_tag_names: Vec<String>,
    /// Archive reader (archive formats only).
    pub archive_lib: Option<ArchiveLib>,
}

impl Codec {
    /// Returns the field delimiter byte for delimited formats.
    #[must_use]
    pub fn delimiter(&self) -> u8 {
        match self.separator {
            Some("\t") => b'\t',
            _ => b',',
        }
    }
}

/// Builds [`Codec`] descriptors and detects input formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecRegistry {
    node_tag_names: Vec<String>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new(&TransferConfig::default())
    }
}

impl CodecRegistry {
    /// Creates a registry from configuration.
    #[must_use]
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            node_tag_names: config
                .xml
                .node_tag_names
                .iter()
                .map(|tag| tag.to_lowercase())
                .collect(),
        }
    }

    /// Returns the descriptor for a format.
    #[must_use]
    pub fn codec_for(&self, format: Format) -> Codec {
        let (separator, node_tag_names, archive_lib) = match format {
            Format::Csv => (Some(","), Vec::new(), None),
            Format::Tsv => (Some("\t"), Vec::new(), None),
            Format::Json | Format::Ndjson => (Some("\n"), Vec::new(), None),
            Format::Yaml => (Some("\n---\n"), Vec::new(), None),
            Format::Xml => (None, self.node_tag_names.clone(), None),
            Format::Xlsx => (None, Vec::new(), Some(ArchiveLib::Xlsx)),
            Format::Zip => (None, Vec::new(), Some(ArchiveLib::Zip)),
            Format::Plain => (None, Vec::new(), None),
        };
        Codec {
            format,
            ext: format.extension(),
            class: format.class(),
            separator,
            node_tag_names,
            archive_lib,
        }
    }

    /// Resolves a format name or extension, with or without a leading dot.
    ///
    /// # Errors
    ///
    /// Returns `UNSUPPORTED` for unknown names.
    pub fn resolve(&self, name: &str) -> std::result::Result<Codec, FatalError> {
        Format::from_extension(name)
            .map(|format| self.codec_for(format))
            .ok_or_else(|| FatalError::with_detail(FatalCode::Unsupported, format!("format '{name}'")))
    }

    /// Detects the codec for an input.
    ///
    /// Known extensions win, except `.txt` which is sniffed since text exports
    /// from other tools often carry it. Inputs without an extension are sniffed.
    ///
    /// # Errors
    ///
    /// Returns `UNSUPPORTED` for unknown extensions or undetectable binary content.
    pub fn detect(&self, input: &TransferInput) -> std::result::Result<Codec, FatalError> {
        let name = input.name();
        let label = name.as_deref().unwrap_or("<bytes>");
        let ext = input.extension();
        let from_ext = ext.as_deref().and_then(Format::from_extension);

        let format = match (ext.as_deref(), from_ext) {
            (_, Some(format)) if format != Format::Plain => {
                tracing::info!(
                    input = label,
                    format = %format,
                    "Detected input format from extension"
                );
                format
            },
            (Some(ext), None) => {
                return Err(FatalError::with_detail(
                    FatalCode::Unsupported,
                    format!("extension '.{ext}'"),
                ));
            },
            _ => {
                let head = input.head(SNIFF_BYTES).map_err(|e| {
                    FatalError::with_detail(FatalCode::ParserError, e.to_string())
                })?;
                let sniffed = sniff(&head).ok_or_else(|| {
                    FatalError::with_detail(FatalCode::Unsupported, "unrecognized binary content")
                })?;
                tracing::info!(
                    input = label,
                    format = %sniffed,
                    ext = sniffed.extension(),
                    "Detected input format from content"
                );
                sniffed
            },
        };

        Ok(self.codec_for(format))
    }
}

/// Guesses a format from leading bytes.
///
/// Returns `None` only for binary content that is neither ZIP nor UTF-8 text.
#[must_use]
pub fn sniff(head: &[u8]) -> Option<Format> {
    if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") {
        return Some(if is_workbook(head) {
            Format::Xlsx
        } else {
            Format::Zip
        });
    }

    let text = utf8_prefix(head)?;
    let text = text.trim_start_matches('\u{feff}').trim_start();

    let first_line = text.lines().next().unwrap_or_default();
    let format = match text.chars().next() {
        None => Format::Plain,
        Some('<') => Format::Xml,
        Some('{') => Format::Ndjson,
        Some('[') => Format::Json,
        _ if first_line.starts_with("---") || first_line.starts_with("- ") => Format::Yaml,
        _ if is_yaml_mapping(first_line) => Format::Yaml,
        _ if first_line.contains('\t') => Format::Tsv,
        _ if first_line.contains(',') => Format::Csv,
        _ => Format::Plain,
    };
    Some(format)
}

/// Returns the valid UTF-8 prefix, tolerating a sequence cut at the end.
fn utf8_prefix(head: &[u8]) -> Option<&str> {
    match std::str::from_utf8(head) {
        Ok(text) => Some(text),
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&head[..e.valid_up_to()]).ok(),
        Err(_) => None,
    }
}

/// Workbooks start with one of the OOXML package parts.
fn is_workbook(head: &[u8]) -> bool {
    const MARKERS: [&[u8]; 4] = [b"[Content_Types].xml", b"xl/", b"_rels/", b"docProps/"];
    // First local file header name starts at offset 30.
    head.get(30..).is_some_and(|name| {
        MARKERS.iter().any(|marker| name.starts_with(marker))
    })
}

fn is_yaml_mapping(line: &str) -> bool {
    let Some((key, rest)) = line.split_once(':') else {
        return false;
    };
    let key_ok = !key.is_empty()
        && key.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' '));
    key_ok && (rest.is_empty() || rest.starts_with(' '))
}
