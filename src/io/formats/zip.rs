//! ZIP format adapter for import/export.
//!
//! An archive carrying `manifest.json` is read through the manifest, which
//! fixes ordering, names, kinds and integrity hashes. Without a manifest,
//! every file entry becomes one asset and its extension becomes the kind.
//!
//! All entry reads go through [`ArchiveGuard`].

use crate::io::archive::{ArchiveGuard, EntryError, is_unsafe_path, read_capped};
use crate::io::hash::ContentHasher;
use crate::io::input::ReadSeek;
use crate::io::traits::{ExportSink, ParseContext, ParsedRow, RowIter};
use crate::models::{
    Asset, ExportAsset, FatalCode, FatalError, MANIFEST_FILE, Manifest, ManifestEntry, ParseError,
    Row, RowErrorCode,
};
use crate::{Error, Result};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::Path;
use zip::ZipArchive;
use zip::result::ZipError;
use zip::write::{SimpleFileOptions, ZipWriter};

type Archive = ZipArchive<Box<dyn ReadSeek>>;

/// Opens an archive parser.
///
/// # Errors
///
/// Returns `INVALID_FORMAT` for a corrupt archive and `INVALID_MANIFEST` for
/// an unreadable manifest.
pub fn rows(
    reader: Box<dyn ReadSeek>,
    archive_len: u64,
    ctx: &ParseContext,
) -> std::result::Result<RowIter, FatalError> {
    let mut archive = ZipArchive::new(reader).map_err(|e| invalid_archive(&e))?;
    let guard = ArchiveGuard::new(&ctx.limits, archive_len);

    let manifest = match archive.by_name(MANIFEST_FILE) {
        Ok(file) => Some(read_capped(file, ctx.limits.entry_bytes).map_err(|e| {
            let detail = match e {
                EntryError::TooLarge { read } => format!("manifest exceeds {read} bytes"),
                EntryError::Io(e) => e.to_string(),
            };
            FatalError::with_detail(FatalCode::InvalidManifest, detail)
        })?),
        Err(ZipError::FileNotFound) => None,
        Err(e) => return Err(invalid_archive(&e)),
    };

    match manifest {
        Some(bytes) => {
            let manifest = Manifest::parse(&bytes)?;
            tracing::debug!(entries = manifest.entries.len(), "Reading archive through manifest");
            let entries: Vec<_> = manifest
                .entries
                .into_iter()
                .filter(|entry| entry.name != MANIFEST_FILE)
                .collect();
            Ok(Box::new(ManifestRows {
                source: EntrySource::new(archive, guard, ctx),
                entries: entries.into_iter(),
                ordinal: 0,
                done: false,
            }))
        },
        None => {
            let indices = file_indices(&archive);
            Ok(Box::new(PlainRows {
                source: EntrySource::new(archive, guard, ctx),
                indices: indices.into_iter(),
                ordinal: 0,
                done: false,
            }))
        },
    }
}

fn invalid_archive(error: &ZipError) -> FatalError {
    FatalError::with_detail(FatalCode::InvalidFormat, format!("corrupt archive: {error}"))
}

/// Indices of non-directory entries, in archive order.
fn file_indices(archive: &Archive) -> Vec<usize> {
    (0..archive.len())
        .filter(|&i| {
            archive
                .name_for_index(i)
                .is_some_and(|name| !name.ends_with('/') && name != MANIFEST_FILE)
        })
        .collect()
}

/// Kind inferred from an entry's extension.
fn kind_from_name(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(str::to_lowercase)
}

/// Archive plus the decompression budget shared by all of its entries.
struct EntrySource {
    archive: Archive,
    guard: ArchiveGuard,
    ctx: ParseContext,
}

/// Outcome of reading one entry: content, a row-level error, or a fatal stop.
enum EntryRead {
    Content { bytes: Vec<u8>, compressed: u64 },
    Rejected(RowErrorCode, String, u64),
}

impl EntrySource {
    fn new(archive: Archive, guard: ArchiveGuard, ctx: &ParseContext) -> Self {
        Self {
            archive,
            guard,
            ctx: ctx.clone(),
        }
    }

    fn read(&mut self, locate: Locate<'_>) -> std::result::Result<EntryRead, FatalError> {
        let cap = self.ctx.limits.entry_bytes;
        let file = match locate {
            Locate::Name(name) => self.archive.by_name(name),
            Locate::Index(index) => self.archive.by_index(index),
        };
        let file = match file {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => {
                return Ok(EntryRead::Rejected(
                    RowErrorCode::Decompress,
                    "entry missing from archive".to_string(),
                    0,
                ));
            },
            Err(e) => return Ok(EntryRead::Rejected(RowErrorCode::Decompress, e.to_string(), 0)),
        };
        let compressed = file.compressed_size();
        if file.size() > cap {
            return Ok(EntryRead::Rejected(
                RowErrorCode::TooLarge,
                format!("entry declares {} bytes, limit is {cap}", file.size()),
                compressed,
            ));
        }
        Ok(match self.guard.read_entry(file)? {
            Ok(bytes) => EntryRead::Content { bytes, compressed },
            Err(EntryError::TooLarge { read }) => EntryRead::Rejected(
                RowErrorCode::TooLarge,
                format!("entry inflated past {read} bytes, limit is {cap}"),
                compressed,
            ),
            Err(EntryError::Io(e)) => {
                EntryRead::Rejected(RowErrorCode::Decompress, e.to_string(), compressed)
            },
        })
    }
}

enum Locate<'a> {
    Name(&'a str),
    Index(usize),
}

fn rejected(code: RowErrorCode, ordinal: u64, detail: impl Into<String>) -> Row {
    ParseError::new(code, ordinal).with_detail(detail).into()
}

/// Rows driven by `manifest.json`.
struct ManifestRows {
    source: EntrySource,
    entries: std::vec::IntoIter<ManifestEntry>,
    ordinal: u64,
    done: bool,
}

impl ManifestRows {
    fn entry_row(&mut self, entry: ManifestEntry) -> std::result::Result<ParsedRow, FatalError> {
        let ordinal = self.ordinal;
        let cap = self.source.ctx.limits.entry_bytes;

        if is_unsafe_path(&entry.name) {
            let row = rejected(RowErrorCode::InvalidPath, ordinal, entry.name);
            return Ok(ParsedRow::new(row, 0));
        }
        if let Some(size) = entry.size.filter(|&size| size > cap) {
            let row = rejected(
                RowErrorCode::TooLarge,
                ordinal,
                format!("manifest declares {size} bytes, limit is {cap}"),
            );
            return Ok(ParsedRow::new(row, 0));
        }

        let (bytes, compressed) = match self.source.read(Locate::Name(&entry.name))? {
            EntryRead::Content { bytes, compressed } => (bytes, compressed),
            EntryRead::Rejected(code, detail, compressed) => {
                return Ok(ParsedRow::new(rejected(code, ordinal, detail), compressed));
            },
        };

        let computed = ContentHasher::hash(&bytes);
        if let Some(expected) = entry.hash.as_deref()
            && !ContentHasher::matches(&bytes, expected)
        {
            let row = rejected(
                RowErrorCode::HashMismatch,
                ordinal,
                format!("expected {expected}, computed {computed}"),
            );
            return Ok(ParsedRow::new(row, compressed));
        }

        let Ok(content) = String::from_utf8(bytes) else {
            let row = rejected(RowErrorCode::InvalidRecord, ordinal, "entry is not valid UTF-8");
            return Ok(ParsedRow::new(row, compressed));
        };

        let kind = entry
            .kind
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.source.ctx.fallback_kind.clone());
        let Some(kind) = kind else {
            let row: Row = ParseError::new(RowErrorCode::MissingKind, ordinal).into();
            return Ok(ParsedRow::new(row, compressed));
        };

        let asset = Asset::new(ordinal, kind, content)
            .with_name(entry.name)
            .with_hash(computed);
        Ok(ParsedRow::new(asset, compressed))
    }
}

impl Iterator for ManifestRows {
    type Item = std::result::Result<ParsedRow, FatalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(entry) = self.entries.next() else {
            self.done = true;
            return None;
        };
        self.ordinal += 1;
        let result = self.entry_row(entry);
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

/// Rows for an archive without a manifest.
struct PlainRows {
    source: EntrySource,
    indices: std::vec::IntoIter<usize>,
    ordinal: u64,
    done: bool,
}

impl PlainRows {
    fn entry_row(&mut self, index: usize) -> std::result::Result<ParsedRow, FatalError> {
        let ordinal = self.ordinal;
        let name = self
            .source
            .archive
            .name_for_index(index)
            .unwrap_or_default()
            .to_string();

        if is_unsafe_path(&name) {
            return Ok(ParsedRow::new(rejected(RowErrorCode::InvalidPath, ordinal, name), 0));
        }

        let (bytes, compressed) = match self.source.read(Locate::Index(index))? {
            EntryRead::Content { bytes, compressed } => (bytes, compressed),
            EntryRead::Rejected(code, detail, compressed) => {
                // Without a manifest there is nothing to verify against, so
                // every unreadable entry is a decompression failure.
                let code = if code == RowErrorCode::TooLarge {
                    code
                } else {
                    RowErrorCode::Decompress
                };
                return Ok(ParsedRow::new(rejected(code, ordinal, detail), compressed));
            },
        };

        let Ok(content) = String::from_utf8(bytes) else {
            let row = rejected(RowErrorCode::InvalidRecord, ordinal, "entry is not valid UTF-8");
            return Ok(ParsedRow::new(row, compressed));
        };

        let kind = kind_from_name(&name).or_else(|| self.source.ctx.fallback_kind.clone());
        let Some(kind) = kind else {
            let row: Row = ParseError::new(RowErrorCode::MissingKind, ordinal).into();
            return Ok(ParsedRow::new(row, compressed));
        };

        let hash = ContentHasher::hash(content.as_bytes());
        let asset = Asset::new(ordinal, kind, content)
            .with_name(name)
            .with_hash(hash);
        Ok(ParsedRow::new(asset, compressed))
    }
}

impl Iterator for PlainRows {
    type Item = std::result::Result<ParsedRow, FatalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(index) = self.indices.next() else {
            self.done = true;
            return None;
        };
        self.ordinal += 1;
        let result = self.entry_row(index);
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

/// ZIP export sink.
///
/// Writes one entry per asset and `manifest.json` last. Missing hashes are
/// computed so the archive re-imports through the manifest path losslessly.
pub struct ZipExportSink {
    zip: ZipWriter<Cursor<Vec<u8>>>,
    manifest: Manifest,
    names: HashSet<String>,
}

impl ZipExportSink {
    /// Creates a new ZIP export sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
            manifest: Manifest::new(),
            names: HashSet::new(),
        }
    }

    /// Picks a safe entry name that is unique within the archive.
    fn entry_name(&mut self, asset: &ExportAsset) -> String {
        let base = asset.name.as_deref().map_or_else(
            || format!("{}.{}", sanitize(&asset.id), sanitize(&asset.kind)),
            sanitize,
        );
        let (stem, ext) = match base.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
            _ => (base.clone(), String::new()),
        };
        let mut name = base;
        let mut n = 1;
        while name == MANIFEST_FILE || self.names.contains(&name) {
            name = format!("{stem}-{n}{ext}");
            n += 1;
        }
        self.names.insert(name.clone());
        name
    }
}

impl Default for ZipExportSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Flattens a name into a single safe path segment.
fn sanitize(raw: &str) -> String {
    let mut cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "asset".to_string()
    } else {
        cleaned
    }
}

impl ExportSink for ZipExportSink {
    fn write(&mut self, asset: &ExportAsset) -> Result<()> {
        let name = self.entry_name(asset);
        let content = asset.content.as_bytes();
        let hash = asset
            .hash
            .clone()
            .unwrap_or_else(|| ContentHasher::hash(content));

        self.zip
            .start_file(name.as_str(), SimpleFileOptions::default())
            .map_err(|e| Error::operation("write_zip", e))?;
        self.zip
            .write_all(content)
            .map_err(|e| Error::operation("write_zip", e))?;

        self.manifest.entries.push(ManifestEntry {
            name,
            kind: Some(asset.kind.clone()),
            hash: Some(hash),
            size: Some(content.len() as u64),
        });
        Ok(())
    }

    fn take_chunk(&mut self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn finalize(mut self: Box<Self>) -> Result<Vec<u8>> {
        let manifest = serde_json::to_vec_pretty(&self.manifest)
            .map_err(|e| Error::operation("serialize_manifest", e))?;
        self.zip
            .start_file(MANIFEST_FILE, SimpleFileOptions::default())
            .map_err(|e| Error::operation("write_zip", e))?;
        self.zip
            .write_all(&manifest)
            .map_err(|e| Error::operation("write_zip", e))?;
        let cursor = self
            .zip
            .finish()
            .map_err(|e| Error::operation("finish_zip", e))?;
        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use zip::CompressionMethod;

    fn build(entries: &[(&str, &[u8])], method: CompressionMethod) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(method);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn run(data: Vec<u8>, limits: Limits) -> Vec<std::result::Result<ParsedRow, FatalError>> {
        let ctx = ParseContext::new(limits, None);
        let len = data.len() as u64;
        rows(Box::new(Cursor::new(data)), len, &ctx).unwrap().collect()
    }

    fn manifest(entries: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({"version": 1, "entries": entries})).unwrap()
    }

    #[test]
    fn test_manifest_import() {
        let hash = ContentHasher::hash(b"abc");
        let manifest = manifest(serde_json::json!([
            {"name": "b.svg", "kind": "icon", "hash": hash},
            {"name": "../evil", "kind": "icon"},
            {"name": "a.txt", "kind": "doc", "hash": "00ff"},
            {"name": "gone.txt", "kind": "doc"},
            {"name": "c.txt"},
        ]));
        let data = build(
            &[
                ("b.svg", b"abc".as_slice()),
                ("a.txt", b"tampered".as_slice()),
                ("c.txt", b"x".as_slice()),
                (MANIFEST_FILE, manifest.as_slice()),
            ],
            CompressionMethod::Deflated,
        );
        let rows: Vec<_> = run(data, Limits::default())
            .into_iter()
            .collect::<std::result::Result<_, _>>()
            .unwrap();

        assert_eq!(rows.len(), 5);
        assert!(matches!(&rows[0].row, Row::Asset(a) if a.ordinal == 1 && a.kind == "icon" && a.hash.as_deref() == Some(hash.as_str())));
        assert!(matches!(&rows[1].row, Row::Error(e) if e.code == RowErrorCode::InvalidPath && e.ordinal == 2));
        assert!(matches!(&rows[2].row, Row::Error(e) if e.code == RowErrorCode::HashMismatch));
        assert!(matches!(&rows[3].row, Row::Error(e) if e.code == RowErrorCode::Decompress));
        assert!(matches!(&rows[4].row, Row::Error(e) if e.code == RowErrorCode::MissingKind));
    }

    #[test]
    fn test_invalid_manifest_is_fatal() {
        let data = build(
            &[(MANIFEST_FILE, b"{\"version\": 2, \"entries\": []}".as_slice())],
            CompressionMethod::Stored,
        );
        let ctx = ParseContext::new(Limits::default(), None);
        let len = data.len() as u64;
        let Err(err) = rows(Box::new(Cursor::new(data)), len, &ctx) else {
            panic!("expected fatal error");
        };
        assert_eq!(err.code, FatalCode::InvalidManifest);
    }

    #[test]
    fn test_plain_archive_uses_extensions() {
        let data = build(
            &[
                ("icons/", b"".as_slice()),
                ("icons/star.svg", b"<svg/>".as_slice()),
                ("README", b"hi".as_slice()),
            ],
            CompressionMethod::Deflated,
        );
        let rows: Vec<_> = run(data, Limits::default())
            .into_iter()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(matches!(&rows[0].row, Row::Asset(a) if a.kind == "svg" && a.name.as_deref() == Some("icons/star.svg")));
        assert!(matches!(&rows[1].row, Row::Error(e) if e.code == RowErrorCode::MissingKind));
    }

    #[test]
    fn test_compression_ratio_is_fatal() {
        let bomb = vec![0u8; 4 * 1024 * 1024];
        let data = build(&[("zeros.bin", bomb.as_slice())], CompressionMethod::Deflated);
        let events = run(data, Limits::default());
        assert_eq!(events.len(), 1);
        let err = events[0].as_ref().unwrap_err();
        assert_eq!(err.code, FatalCode::CompressionRatio);
    }

    #[test]
    fn test_total_limit_is_fatal() {
        let chunk = vec![7u8; 1000];
        let data = build(
            &[
                ("a.txt", chunk.as_slice()),
                ("b.txt", chunk.as_slice()),
                ("c.txt", chunk.as_slice()),
            ],
            CompressionMethod::Stored,
        );
        let limits = Limits {
            entry_bytes: 1000,
            total_bytes: 2500,
            ..Limits::default()
        };
        let events = run(data, limits);
        assert_eq!(events.len(), 3);
        assert!(events[1].is_ok());
        assert_eq!(events[2].as_ref().unwrap_err().code, FatalCode::ArchiveLimit);
    }

    #[test]
    fn test_oversized_entry_is_row_error() {
        let data = build(
            &[("big.txt", [b'x'; 64].as_slice()), ("ok.txt", b"fine".as_slice())],
            CompressionMethod::Stored,
        );
        let limits = Limits {
            entry_bytes: 32,
            ..Limits::default()
        };
        let rows: Vec<_> = run(data, limits)
            .into_iter()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert!(matches!(&rows[0].row, Row::Error(e) if e.code == RowErrorCode::TooLarge));
        assert!(rows[1].row.is_asset());
    }

    #[test]
    fn test_export_writes_manifest() {
        let mut sink = ZipExportSink::new();
        sink.write(&ExportAsset::new("1", "icon", "abc").with_name("../star.svg"))
            .unwrap();
        sink.write(&ExportAsset::new("2", "icon", "def").with_name("star.svg"))
            .unwrap();
        sink.write(&ExportAsset::new("3", "doc", "ghi")).unwrap();
        let data = Box::new(sink).finalize().unwrap();

        let mut archive = ZipArchive::new(Cursor::new(data.clone())).unwrap();
        let mut raw = Vec::new();
        std::io::Read::read_to_end(&mut archive.by_name(MANIFEST_FILE).unwrap(), &mut raw)
            .unwrap();
        let manifest = Manifest::parse(&raw).unwrap();
        let names: Vec<_> = manifest.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["_star.svg", "star.svg", "3.doc"]);
        assert_eq!(manifest.entries[0].hash.as_deref(), Some(ContentHasher::hash(b"abc").as_str()));

        let rows: Vec<_> = run(data, Limits::default())
            .into_iter()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.row.is_asset()));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("../../etc/passwd"), "_._etc_passwd");
        assert_eq!(sanitize(".."), "asset");
        assert_eq!(sanitize("a b.svg"), "a_b.svg");
    }
}
