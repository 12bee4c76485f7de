//! Guarded decompression for archive entries.
//!
//! Every entry read from an archive goes through an [`ArchiveGuard`], which
//! reads in fixed-size chunks and keeps a running total across the whole
//! archive. Limits trip while reading, so a zip bomb never fully inflates.

use crate::config::Limits;
use crate::models::{FatalCode, FatalError};
use std::io::{self, Read};

/// Chunk size used while inflating entries.
pub const CHUNK_BYTES: usize = 64 * 1024;

/// Why a single entry could not be read. The archive itself stays usable.
#[derive(Debug)]
pub enum EntryError {
    /// The entry exceeded the per-entry cap.
    TooLarge {
        /// Bytes read before the cap tripped.
        read: u64,
    },
    /// The entry failed to decompress.
    Io(io::Error),
}

/// Running decompression budget for one archive.
#[derive(Debug, Clone)]
pub struct ArchiveGuard {
    entry_bytes: u64,
    total_bytes: u64,
    ratio: u64,
    archive_len: u64,
    inflated: u64,
}

impl ArchiveGuard {
    /// Creates a guard for an archive of `archive_len` compressed bytes.
    #[must_use]
    pub fn new(limits: &Limits, archive_len: u64) -> Self {
        Self {
            entry_bytes: limits.entry_bytes,
            total_bytes: limits.total_bytes,
            ratio: limits.compression_ratio,
            archive_len: archive_len.max(1),
            inflated: 0,
        }
    }

    /// Overrides the per-entry cap.
    #[must_use]
    pub const fn with_entry_cap(mut self, entry_bytes: u64) -> Self {
        self.entry_bytes = entry_bytes;
        self
    }

    /// Returns the per-entry cap.
    #[must_use]
    pub const fn entry_cap(&self) -> u64 {
        self.entry_bytes
    }

    /// Returns decompressed bytes across the archive so far.
    #[must_use]
    pub const fn inflated(&self) -> u64 {
        self.inflated
    }

    /// Reads one entry under the archive budget.
    ///
    /// The outer error is archive-fatal (`ARCHIVE_LIMIT`, `COMPRESSION_RATIO`);
    /// the inner error only affects this entry.
    ///
    /// # Errors
    ///
    /// Returns a [`FatalError`] when the archive-wide total or ratio trips.
    pub fn read_entry<R: Read>(
        &mut self,
        mut reader: R,
    ) -> Result<Result<Vec<u8>, EntryError>, FatalError> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; CHUNK_BYTES];
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Ok(Err(EntryError::Io(e))),
            };
            self.charge(n as u64)?;
            if (out.len() + n) as u64 > self.entry_bytes {
                return Ok(Err(EntryError::TooLarge {
                    read: (out.len() + n) as u64,
                }));
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(Ok(out))
    }

    /// Charges `bytes` of inflated output against the archive budget.
    ///
    /// # Errors
    ///
    /// Returns `ARCHIVE_LIMIT` past the total cap or `COMPRESSION_RATIO` past
    /// the ratio cap.
    pub fn charge(&mut self, bytes: u64) -> Result<(), FatalError> {
        self.inflated += bytes;
        if self.inflated > self.total_bytes {
            return Err(FatalError::with_detail(
                FatalCode::ArchiveLimit,
                format!("decompressed size exceeds {} bytes", self.total_bytes),
            ));
        }
        if self.inflated > self.archive_len.saturating_mul(self.ratio) {
            return Err(FatalError::with_detail(
                FatalCode::CompressionRatio,
                format!(
                    "{} bytes inflated from a {}-byte archive exceeds ratio {}",
                    self.inflated, self.archive_len, self.ratio
                ),
            ));
        }
        Ok(())
    }
}

/// Streams an entry while charging every byte to an [`ArchiveGuard`].
///
/// A tripped limit surfaces as an I/O error to the consumer; the fatal cause
/// stays available through [`GuardedReader::tripped`].
pub struct GuardedReader<R> {
    inner: R,
    guard: ArchiveGuard,
    tripped: Option<FatalError>,
}

impl<R: Read> GuardedReader<R> {
    /// Wraps `inner`, continuing the budget already spent by `guard`.
    pub const fn new(inner: R, guard: ArchiveGuard) -> Self {
        Self {
            inner,
            guard,
            tripped: None,
        }
    }

    /// Returns the limit that stopped the stream, if any.
    #[must_use]
    pub const fn tripped(&self) -> Option<&FatalError> {
        self.tripped.as_ref()
    }
}

impl<R: Read> Read for GuardedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(fatal) = &self.tripped {
            return Err(io::Error::other(fatal.to_string()));
        }
        let n = self.inner.read(buf)?;
        if let Err(fatal) = self.guard.charge(n as u64) {
            let error = io::Error::other(fatal.to_string());
            self.tripped = Some(fatal);
            return Err(error);
        }
        Ok(n)
    }
}

/// Reads at most `cap` bytes, failing when the source is longer.
///
/// Used for metadata parts that do not count against the archive budget.
///
/// # Errors
///
/// Returns [`EntryError::TooLarge`] past the cap or [`EntryError::Io`].
pub fn read_capped<R: Read>(reader: R, cap: u64) -> Result<Vec<u8>, EntryError> {
    let mut out = Vec::new();
    reader
        .take(cap.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(EntryError::Io)?;
    if out.len() as u64 > cap {
        return Err(EntryError::TooLarge {
            read: out.len() as u64,
        });
    }
    Ok(out)
}

/// Returns whether an entry path escapes the archive root.
#[must_use]
pub fn is_unsafe_path(name: &str) -> bool {
    name.contains("..") || name.starts_with('/') || name.starts_with('\\')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn limits(entry: u64, total: u64, ratio: u64) -> Limits {
        Limits {
            entry_bytes: entry,
            total_bytes: total,
            compression_ratio: ratio,
            ..Limits::default()
        }
    }

    #[test]
    fn test_reads_entry_within_limits() {
        let mut guard = ArchiveGuard::new(&limits(100, 1000, 100), 50);
        let bytes = guard.read_entry(Cursor::new(b"hello")).unwrap().unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(guard.inflated(), 5);
    }

    #[test]
    fn test_entry_cap_is_row_level() {
        let mut guard = ArchiveGuard::new(&limits(4, 1000, 100), 50);
        let result = guard.read_entry(Cursor::new(b"hello")).unwrap();
        assert!(matches!(result, Err(EntryError::TooLarge { read: 5 })));
    }

    #[test]
    fn test_total_cap_is_fatal() {
        let mut guard = ArchiveGuard::new(&limits(10, 12, 100), 50);
        assert!(guard.read_entry(Cursor::new(vec![0u8; 8])).is_ok());
        let err = guard.read_entry(Cursor::new(vec![0u8; 8])).unwrap_err();
        assert_eq!(err.code, FatalCode::ArchiveLimit);
    }

    #[test]
    fn test_ratio_is_fatal() {
        let mut guard = ArchiveGuard::new(&limits(1 << 20, 1 << 30, 10), 100);
        let err = guard.read_entry(Cursor::new(vec![0u8; 1001])).unwrap_err();
        assert_eq!(err.code, FatalCode::CompressionRatio);
    }

    #[test]
    fn test_guarded_reader_streams_and_trips() {
        let guard = ArchiveGuard::new(&limits(u64::MAX, 10, 100), 50);
        let mut reader = GuardedReader::new(Cursor::new(vec![b'x'; 6]), guard.clone());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 6);
        assert!(reader.tripped().is_none());

        let mut reader = GuardedReader::new(Cursor::new(vec![b'x'; 16]), guard);
        assert!(reader.read_to_end(&mut Vec::new()).is_err());
        assert_eq!(reader.tripped().map(|f| f.code), Some(FatalCode::ArchiveLimit));
        assert!(reader.read(&mut [0u8; 4]).is_err());
    }

    #[test]
    fn test_read_capped() {
        assert_eq!(read_capped(Cursor::new(b"abc"), 3).unwrap(), b"abc");
        assert!(matches!(
            read_capped(Cursor::new(b"abcd"), 3),
            Err(EntryError::TooLarge { read: 4 })
        ));
    }

    #[test]
    fn test_unsafe_paths() {
        assert!(is_unsafe_path("../etc/passwd"));
        assert!(is_unsafe_path("a/../../b"));
        assert!(is_unsafe_path("/abs"));
        assert!(is_unsafe_path("\\share\\x"));
        assert!(!is_unsafe_path("nested/file.txt"));
    }
}
