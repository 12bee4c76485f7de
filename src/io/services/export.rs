//! Asset export service.
//!
//! Text formats are produced as a lazy sequence of byte chunks, one per
//! batch of `limits.batch_size` assets. Binary formats (XLSX, ZIP) are built
//! in memory and returned as a single base64 artifact.

use crate::config::TransferConfig;
use crate::io::codec::Format;
use crate::io::formats::create_export_sink;
use crate::io::traits::ExportSink;
use crate::models::ExportAsset;
use crate::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// A buffered binary export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    /// Base64-encoded artifact bytes.
    pub data: String,
    /// File name, `{base}.{ext}`.
    pub name: String,
    /// Number of assets written.
    pub count: usize,
}

impl ExportArtifact {
    /// Decodes the artifact bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| Error::operation("decode_artifact", e))
    }
}

/// Result of an export operation.
#[derive(Debug, Clone)]
pub struct ExportResult {
    /// Number of assets exported.
    pub exported: usize,
    /// Format used for export.
    pub format: Format,
    /// Output path (if file export).
    pub output_path: Option<String>,
}

impl ExportResult {
    /// Creates a new export result.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self {
            exported: 0,
            format,
            output_path: None,
        }
    }

    /// Returns whether any assets were exported.
    #[must_use]
    pub const fn has_exports(&self) -> bool {
        self.exported > 0
    }
}

/// Lazy chunked export.
///
/// Each `next()` writes up to one batch of assets and yields the bytes the
/// sink produced for it. The finalizer output (closing tags, or the whole
/// artifact for binary formats) is the last chunk. Empty chunks are never
/// yielded. The iterator is fused after an error.
pub struct ExportChunks<I> {
    assets: I,
    sink: Option<Box<dyn ExportSink>>,
    format: Format,
    batch_size: usize,
    exported: usize,
}

impl<I> ExportChunks<I>
where
    I: Iterator<Item = ExportAsset>,
{
    fn new(assets: I, sink: Box<dyn ExportSink>, format: Format, batch_size: usize) -> Self {
        Self {
            assets,
            sink: Some(sink),
            format,
            batch_size: batch_size.max(1),
            exported: 0,
        }
    }

    /// Number of assets written so far.
    #[must_use]
    pub const fn exported(&self) -> usize {
        self.exported
    }

    /// The format being written.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let Some(sink) = self.sink.as_mut() else {
                return Ok(None);
            };

            let mut written = 0;
            for asset in self.assets.by_ref().take(self.batch_size) {
                sink.write(&asset)?;
                written += 1;
            }
            self.exported += written;

            if written == self.batch_size {
                let chunk = sink.take_chunk()?;
                if chunk.is_empty() {
                    continue;
                }
                return Ok(Some(chunk));
            }

            // Input exhausted: the rest of the buffer plus the trailer.
            let Some(sink) = self.sink.take() else {
                return Ok(None);
            };
            let chunk = sink.finalize()?;
            metrics::counter!("bulkport_exports_total", "format" => self.format.as_str())
                .increment(self.exported as u64);
            tracing::debug!(format = %self.format, exported = self.exported, "Export finished");
            return Ok((!chunk.is_empty()).then_some(chunk));
        }
    }
}

impl<I> Iterator for ExportChunks<I>
where
    I: Iterator<Item = ExportAsset>,
{
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_chunk() {
            Ok(chunk) => chunk.map(Ok),
            Err(e) => {
                self.sink = None;
                tracing::warn!(format = %self.format, "Export failed: {e}");
                Some(Err(e))
            },
        }
    }
}

/// Service for exporting assets to external formats.
#[derive(Debug, Clone)]
pub struct ExportService {
    config: Arc<TransferConfig>,
}

impl ExportService {
    /// Creates a new export service.
    #[must_use]
    pub fn new(config: TransferConfig) -> Self {
        Self::from_shared(Arc::new(config))
    }

    /// Creates an export service sharing an existing configuration.
    #[must_use]
    pub const fn from_shared(config: Arc<TransferConfig>) -> Self {
        Self { config }
    }

    fn chunks<I>(&self, assets: I, format: Format) -> Result<ExportChunks<I::IntoIter>>
    where
        I: IntoIterator<Item = ExportAsset>,
    {
        let sink = create_export_sink(format)?;
        Ok(ExportChunks::new(
            assets.into_iter(),
            sink,
            format,
            self.config.limits.batch_size,
        ))
    }

    /// Starts a chunked export for a text format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for binary formats (use
    /// [`export_artifact`](Self::export_artifact)) and for `plain`.
    pub fn export_chunks<I>(&self, assets: I, format: Format) -> Result<ExportChunks<I::IntoIter>>
    where
        I: IntoIterator<Item = ExportAsset>,
    {
        if format.is_binary() {
            return Err(Error::InvalidInput(format!(
                "Format '{format}' is binary; export it as an artifact"
            )));
        }
        self.chunks(assets, format)
    }

    /// Builds a binary export and returns it base64-encoded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for text formats, or an error if the
    /// archive cannot be written.
    pub fn export_artifact<I>(&self, assets: I, format: Format, base_name: &str) -> Result<ExportArtifact>
    where
        I: IntoIterator<Item = ExportAsset>,
    {
        if !format.is_binary() {
            return Err(Error::InvalidInput(format!(
                "Format '{format}' is text; export it in chunks"
            )));
        }
        let span = tracing::info_span!("bulkport.export", format = %format);
        let _enter = span.enter();

        let mut chunks = self.chunks(assets, format)?;
        let mut bytes = Vec::new();
        for chunk in chunks.by_ref() {
            bytes.extend(chunk?);
        }
        Ok(ExportArtifact {
            data: STANDARD.encode(bytes),
            name: format!("{base_name}.{}", format.extension()),
            count: chunks.exported(),
        })
    }

    /// Exports assets to a writer in any exportable format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn export_to_writer<I, W>(&self, assets: I, format: Format, writer: &mut W) -> Result<usize>
    where
        I: IntoIterator<Item = ExportAsset>,
        W: Write,
    {
        let span = tracing::info_span!("bulkport.export", format = %format);
        let _enter = span.enter();

        let mut chunks = self.chunks(assets, format)?;
        for chunk in chunks.by_ref() {
            writer
                .write_all(&chunk?)
                .map_err(|e| Error::operation("write_export", e))?;
        }
        writer
            .flush()
            .map_err(|e| Error::operation("flush_export", e))?;
        Ok(chunks.exported())
    }

    /// Exports assets to a file.
    ///
    /// The format is taken from `format`, or from the file extension when
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the format cannot be determined or the file
    /// cannot be written.
    pub fn export_to_file<I>(&self, assets: I, path: &Path, format: Option<Format>) -> Result<ExportResult>
    where
        I: IntoIterator<Item = ExportAsset>,
    {
        let format = format.or_else(|| Format::from_path(path).ok()).ok_or_else(|| {
            Error::InvalidInput(format!("Cannot infer export format from {}", path.display()))
        })?;
        if !format.supports_export() {
            return Err(Error::InvalidInput(format!(
                "Format '{format}' does not support export"
            )));
        }

        let file = File::create(path).map_err(|e| Error::operation("create_export_file", e))?;
        let mut writer = BufWriter::new(file);
        let exported = self.export_to_writer(assets, format, &mut writer)?;

        tracing::info!(exported, path = %path.display(), "Exported assets");
        Ok(ExportResult {
            exported,
            format,
            output_path: Some(path.display().to_string()),
        })
    }
}
