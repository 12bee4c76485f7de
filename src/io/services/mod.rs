//! Import and export service implementations.
//!
//! Orchestrates format detection, parsing and serialization.

pub mod export;
pub mod import;

pub use export::{ExportArtifact, ExportChunks, ExportResult, ExportService};
pub use import::{ImportOptions, ImportService};
