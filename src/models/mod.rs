//! Data models for bulkport.
//!
//! Everything here is created and dropped within a single import, export or
//! worker call. Nothing is cached across calls.

mod asset;
mod errors;
mod manifest;
mod progress;

pub use asset::{Asset, ExportAsset, Row};
pub use errors::{ErrorCode, FatalCode, FatalError, ParseError, PoolError, RowErrorCode};
pub use manifest::{MANIFEST_FILE, MANIFEST_VERSION, Manifest, ManifestEntry};
pub use progress::{ParseResult, Progress, TransferEvent};
