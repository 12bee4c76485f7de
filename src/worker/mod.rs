//! Worker-side RPC surface.
//!
//! A worker receives a [`ParseRequest`], fetches the referenced file and
//! streams [`WorkerEvent`]s back over a bounded channel. The pool owns the
//! receiving end; when it goes away (timeout or the caller dropped the
//! stream) the worker observes a failed send or a raised [`CancelToken`]
//! and stops.

mod fetch;
mod handler;

pub use fetch::{FetchError, FetchedBody, Fetcher, HttpFetcher};
pub use handler::{ParseHandler, TransferHandler};

use crate::io::Format;
use crate::models::{ParseResult, PoolError, Progress};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// A parse job sent to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseRequest {
    /// Time-limited URL of the file to parse.
    pub presigned_url: String,
    /// Format of the file; never sniffed on the worker side.
    pub format: Format,
}

impl ParseRequest {
    /// Creates a new parse request.
    #[must_use]
    pub fn new(presigned_url: impl Into<String>, format: Format) -> Self {
        Self {
            presigned_url: presigned_url.into(),
            format,
        }
    }
}

/// A message from a worker to the pool.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Progress snapshot.
    Progress(Progress),
    /// Terminal result.
    Result(ParseResult),
    /// Terminal failure reported by the handler.
    Failed(PoolError),
    /// The handler panicked.
    Crashed {
        /// Panic message.
        reason: String,
    },
}

/// Cooperative cancellation flag shared between the pool and a job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an unraised token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns whether the token was raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Sending half of a job's event channel.
///
/// Used from worker threads, which are not async, so sends block while the
/// channel is full.
#[derive(Debug, Clone)]
pub struct ReplySender(mpsc::Sender<WorkerEvent>);

impl ReplySender {
    /// Wraps a channel sender.
    #[must_use]
    pub const fn new(sender: mpsc::Sender<WorkerEvent>) -> Self {
        Self(sender)
    }

    /// Sends an event. Returns `false` once the receiver is gone.
    pub fn send(&self, event: WorkerEvent) -> bool {
        self.0.blocking_send(event).is_ok()
    }
}
