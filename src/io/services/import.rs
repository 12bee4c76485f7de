//! Asset import service.
//!
//! Orchestrates bulk asset import from one or more inputs.

use crate::config::TransferConfig;
use crate::io::codec::Format;
use crate::io::input::TransferInput;
use crate::io::pipeline::{StreamOptions, TransferStream};
use crate::models::{ParseResult, Progress};
use crate::{Error, Result};
use std::path::Path;
use std::sync::Arc;

/// Options for asset import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Explicit format; sniffed per input when `None`.
    pub format: Option<Format>,
    /// Kind for records that carry none; overrides the configured default.
    pub fallback_kind: Option<String>,
}

impl ImportOptions {
    /// Creates import options with the given format.
    #[must_use]
    pub const fn with_format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    /// Sets the fallback kind.
    #[must_use]
    pub fn with_fallback_kind(mut self, kind: impl Into<String>) -> Self {
        self.fallback_kind = Some(kind.into());
        self
    }
}

/// Service for importing assets from external formats.
#[derive(Debug, Clone)]
pub struct ImportService {
    config: Arc<TransferConfig>,
}

impl ImportService {
    /// Creates a new import service.
    #[must_use]
    pub fn new(config: TransferConfig) -> Self {
        Self::from_shared(Arc::new(config))
    }

    /// Creates an import service sharing an existing configuration.
    #[must_use]
    pub const fn from_shared(config: Arc<TransferConfig>) -> Self {
        Self { config }
    }

    /// Returns the service configuration.
    #[must_use]
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Starts a lazy import over `inputs`.
    ///
    /// The returned stream yields `Progress` snapshots and ends with exactly
    /// one `Result`, unless a fatal error ends it first.
    #[must_use]
    pub fn import(&self, inputs: Vec<TransferInput>, options: &ImportOptions) -> TransferStream {
        let stream_options = StreamOptions {
            format: options.format,
            fallback_kind: options.fallback_kind.clone(),
            total_bytes: None,
        };
        TransferStream::new(inputs, stream_options, &self.config)
    }

    /// Imports everything and returns the terminal result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] if the stream ends with a fatal error.
    pub fn import_all(
        &self,
        inputs: Vec<TransferInput>,
        options: &ImportOptions,
    ) -> Result<ParseResult> {
        self.import_with_progress(inputs, options, |_| {})
    }

    /// Imports everything, reporting each progress snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] if the stream ends with a fatal error.
    pub fn import_with_progress(
        &self,
        inputs: Vec<TransferInput>,
        options: &ImportOptions,
        on_progress: impl FnMut(&Progress),
    ) -> Result<ParseResult> {
        let count = inputs.len();
        let span = tracing::info_span!("bulkport.import", inputs = count);
        let _enter = span.enter();

        let result = self.import(inputs, options).collect_result(on_progress)?;
        tracing::info!(
            items = result.items.len(),
            errors = result.errors.len(),
            "Import finished"
        );
        Ok(result)
    }

    /// Imports assets from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or the stream fails.
    pub fn import_from_file(&self, path: &Path, options: &ImportOptions) -> Result<ParseResult> {
        if !path.is_file() {
            return Err(Error::InvalidInput(format!(
                "Input file not found: {}",
                path.display()
            )));
        }
        self.import_all(vec![TransferInput::from_path(path)], options)
    }
}
