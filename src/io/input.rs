//! Import inputs.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};

/// Bytes inspected when sniffing a format.
pub const SNIFF_BYTES: usize = 512;

/// Readable and seekable source. Archives need `Seek`; text parsers only read.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// One import input: in-memory bytes or a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferInput {
    /// In-memory bytes with an optional file name.
    Bytes {
        /// File name used for extension lookup.
        name: Option<String>,
        /// Raw input.
        data: Vec<u8>,
    },
    /// A file path, opened lazily.
    Path(PathBuf),
}

impl TransferInput {
    /// Creates a named in-memory input.
    #[must_use]
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self::Bytes {
            name: Some(name.into()),
            data,
        }
    }

    /// Creates an unnamed in-memory input; its format must be sniffed or explicit.
    #[must_use]
    pub const fn anonymous(data: Vec<u8>) -> Self {
        Self::Bytes { name: None, data }
    }

    /// Creates a file input.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// Returns the display name of the input.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        match self {
            Self::Bytes { name, .. } => name.clone(),
            Self::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
        }
    }

    /// Returns the lower-cased file extension, if any.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        let name = self.name()?;
        Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map(str::to_lowercase)
    }

    /// Returns the input size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if file metadata cannot be read.
    pub fn len(&self) -> io::Result<u64> {
        match self {
            Self::Bytes { data, .. } => Ok(data.len() as u64),
            Self::Path(path) => Ok(std::fs::metadata(path)?.len()),
        }
    }

    /// Returns whether the input is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if file metadata cannot be read.
    pub fn is_empty(&self) -> io::Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// Reads up to `limit` leading bytes without consuming the input.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn head(&self, limit: usize) -> io::Result<Vec<u8>> {
        match self {
            Self::Bytes { data, .. } => Ok(data[..data.len().min(limit)].to_vec()),
            Self::Path(path) => {
                let mut head = Vec::with_capacity(limit);
                File::open(path)?
                    .take(limit as u64)
                    .read_to_end(&mut head)?;
                Ok(head)
            },
        }
    }

    /// Opens the input for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(self) -> io::Result<Box<dyn ReadSeek>> {
        match self {
            Self::Bytes { data, .. } => Ok(Box::new(Cursor::new(data))),
            Self::Path(path) => Ok(Box::new(File::open(path)?)),
        }
    }
}
