//! Asset types and the two-track row.

use super::ParseError;
use serde::{Deserialize, Serialize};

/// A parsed asset.
///
/// `ordinal` is the 1-based position of the record within its source and
/// stays stable whether the record parsed or failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// 1-based position within the source.
    pub ordinal: u64,
    /// Asset kind (e.g. `icon`, `svg`, `template`).
    pub kind: String,
    /// Asset content.
    pub content: String,
    /// Optional display or file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional content hash (hex SHA-256).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Asset {
    /// Creates an asset with the required fields.
    #[must_use]
    pub fn new(ordinal: u64, kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            ordinal,
            kind: kind.into(),
            content: content.into(),
            name: None,
            hash: None,
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the hash.
    #[must_use]
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }
}

/// One parsed unit: either an asset or a recoverable error.
///
/// Both variants carry the ordinal of the source record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    /// The record parsed into an asset.
    Asset(Asset),
    /// The record failed; the stream continues.
    Error(ParseError),
}

impl Row {
    /// Returns the ordinal of the source record.
    #[must_use]
    pub const fn ordinal(&self) -> u64 {
        match self {
            Self::Asset(asset) => asset.ordinal,
            Self::Error(error) => error.ordinal,
        }
    }

    /// Returns whether the row is an asset.
    #[must_use]
    pub const fn is_asset(&self) -> bool {
        matches!(self, Self::Asset(_))
    }
}

impl From<Asset> for Row {
    fn from(asset: Asset) -> Self {
        Self::Asset(asset)
    }
}

impl From<ParseError> for Row {
    fn from(error: ParseError) -> Self {
        Self::Error(error)
    }
}

/// Asset representation for export.
///
/// Carries the storage identifier and creation time alongside the fields
/// that import restores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportAsset {
    /// Unique asset identifier.
    pub id: String,
    /// Asset kind.
    pub kind: String,
    /// Asset content.
    pub content: String,
    /// Optional display or file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional content hash (hex SHA-256).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Creation timestamp (Unix epoch seconds).
    #[serde(default)]
    pub created_at: u64,
}

impl ExportAsset {
    /// Creates an exportable asset stamped with the current time.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            content: content.into(),
            name: None,
            hash: None,
            created_at: crate::current_timestamp(),
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the hash.
    #[must_use]
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    /// Sets the creation timestamp.
    #[must_use]
    pub const fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }
}

impl From<Asset> for ExportAsset {
    fn from(asset: Asset) -> Self {
        Self {
            id: asset.ordinal.to_string(),
            kind: asset.kind,
            content: asset.content,
            name: asset.name,
            hash: asset.hash,
            created_at: crate::current_timestamp(),
        }
    }
}
