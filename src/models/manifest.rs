//! Archive manifest.
//!
//! Written by ZIP export, read first by ZIP import to restore ordering,
//! kind and hash.

use super::{FatalCode, FatalError};
use serde::{Deserialize, Serialize};

/// File name of the manifest inside an archive.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Supported manifest version.
pub const MANIFEST_VERSION: u32 = 1;

/// Sidecar index of an exported archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Format version; always 1.
    pub version: u32,
    /// Entries in export order.
    pub entries: Vec<ManifestEntry>,
}

/// Metadata for one archive entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Entry path inside the archive.
    pub name: String,
    /// Asset kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Hex SHA-256 of the entry content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Uncompressed size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Manifest {
    /// Creates an empty version-1 manifest.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: Vec::new(),
        }
    }

    /// Parses manifest bytes.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_MANIFEST` if the bytes are not a version-1 manifest.
    pub fn parse(bytes: &[u8]) -> Result<Self, FatalError> {
        let manifest: Self = serde_json::from_slice(bytes)
            .map_err(|e| FatalError::with_detail(FatalCode::InvalidManifest, e.to_string()))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(FatalError::with_detail(
                FatalCode::InvalidManifest,
                format!("unsupported manifest version {}", manifest.version),
            ));
        }
        Ok(manifest)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}
