//! Presigned-URL fetching.

use std::io::Read;
use std::time::Duration;
use thiserror::Error as ThisError;

/// A fully buffered response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBody {
    /// Body bytes.
    pub bytes: Vec<u8>,
    /// The `content-length` header, if the server sent one.
    pub content_length: Option<u64>,
}

/// Fetch failures.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum FetchError {
    /// The server answered with a non-2xx status.
    #[error("HTTP {0}")]
    Status(u16),
    /// The request could not be completed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The body exceeds the download cap.
    #[error("body exceeds {limit} bytes")]
    TooLarge {
        /// The cap in bytes.
        limit: u64,
    },
}

/// Retrieves the raw file behind a presigned URL.
///
/// Called from worker threads; implementations may block.
pub trait Fetcher: Send + Sync {
    /// Fetches and buffers the whole body.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] on non-2xx status, transport failure, or a
    /// body over the cap.
    fn fetch(&self, url: &str) -> Result<FetchedBody, FetchError>;
}

/// HTTP fetcher using reqwest's blocking client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
    max_bytes: u64,
}

impl HttpFetcher {
    /// Creates a fetcher with a request timeout and a body cap.
    #[must_use]
    pub const fn new(timeout: Duration, max_bytes: u64) -> Self {
        Self { timeout, max_bytes }
    }

    // The blocking client spins up its own runtime, so it is built on the
    // worker thread rather than inside the caller's async context.
    fn client(&self) -> reqwest::blocking::Client {
        reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedBody, FetchError> {
        let response = self
            .client()
            .get(url)
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let content_length = response.content_length();
        if content_length.is_some_and(|len| len > self.max_bytes) {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let mut bytes = Vec::new();
        response
            .take(self.max_bytes.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        if bytes.len() as u64 > self.max_bytes {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }

        tracing::debug!(bytes = bytes.len(), ?content_length, "Fetched presigned body");
        Ok(FetchedBody {
            bytes,
            content_length,
        })
    }
}
