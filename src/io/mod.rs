//! Import/Export I/O subsystem.
//!
//! Provides bulk asset import and export across seven wire formats.
//!
//! # Architecture
//!
//! - [`codec`] resolves a [`Codec`] descriptor per input, by extension or by
//!   sniffing the first bytes
//! - [`formats`] holds one lazy row parser and one export sink per format
//! - [`pipeline`] folds rows into progress snapshots and the terminal
//!   [`ParseResult`](crate::ParseResult); both the in-process import and the
//!   worker pool run this same core
//! - [`services`] orchestrate import and export for callers
//!
//! # Supported Formats
//!
//! | Format | Class | Import | Export | Notes |
//! |--------|-------|--------|--------|-------|
//! | CSV/TSV | delimited | ✓ | ✓ | Header row names the fields |
//! | JSON | stream | ✓ | ✓ | Array or newline-delimited |
//! | NDJSON | stream | ✓ | ✓ | One object per line |
//! | YAML | stream | ✓ | ✓ | `---` separated documents |
//! | XML | tree | ✓ | ✓ | Allow-listed asset tags |
//! | XLSX | archive | ✓ | ✓ | Columns: id, kind, content, name, hash |
//! | ZIP | archive | ✓ | ✓ | With or without `manifest.json` |
//! | Plain | none | ✓ | - | Whole input is one asset |

pub mod archive;
pub mod codec;
pub mod formats;
pub mod hash;
pub mod input;
pub mod pipeline;
pub mod services;
pub mod traits;

// Re-exports for convenience
pub use codec::{ArchiveLib, Codec, CodecClass, CodecRegistry, Format};
pub use input::TransferInput;
pub use pipeline::{ProgressTracker, StreamOptions, TransferStream};
pub use services::export::{ExportArtifact, ExportChunks, ExportResult, ExportService};
pub use services::import::{ImportOptions, ImportService};
pub use traits::{ExportSink, ParseContext, ParsedRow, RowIter};
