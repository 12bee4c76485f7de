//! Content hashing for archive integrity checks.
//!
//! Hashes are lowercase hex SHA-256 over the exact content bytes. Unlike
//! deduplication hashing there is no normalization: a single changed byte
//! must produce a mismatch.

use sha2::{Digest, Sha256};

/// Content hasher for manifest integrity.
///
/// # Example
///
/// ```rust
/// use bulkport::io::hash::ContentHasher;
///
/// let hash = ContentHasher::hash(b"abc");
/// assert_eq!(hash.len(), 64);
/// assert!(ContentHasher::matches(b"abc", &hash.to_uppercase()));
/// ```
pub struct ContentHasher;

impl ContentHasher {
    /// Computes the lowercase hex SHA-256 of `content`.
    #[must_use]
    pub fn hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// Returns whether `content` hashes to `expected` (hex, any case).
    #[must_use]
    pub fn matches(content: &[u8], expected: &str) -> bool {
        Self::hash(content).eq_ignore_ascii_case(expected.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_known_vector() {
        assert_eq!(
            ContentHasher::hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_is_not_normalized() {
        assert_ne!(ContentHasher::hash(b"abc"), ContentHasher::hash(b"abc "));
        assert_ne!(ContentHasher::hash(b"abc"), ContentHasher::hash(b"ABC"));
    }

    #[test]
    fn test_matches_ignores_case() {
        let hash = ContentHasher::hash(b"payload");
        assert!(ContentHasher::matches(b"payload", &hash.to_uppercase()));
        assert!(!ContentHasher::matches(b"payload!", &hash));
    }
}
