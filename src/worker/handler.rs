//! Job handlers run on worker threads.

use super::{CancelToken, FetchError, Fetcher, ParseRequest, ReplySender, WorkerEvent};
use crate::config::TransferConfig;
use crate::io::{StreamOptions, TransferInput, TransferStream};
use crate::models::{ErrorCode, PoolError, RowErrorCode, TransferEvent};
use std::sync::Arc;

/// Executes one parse job, replying through `reply`.
///
/// Must send at most one terminal event (`Result` or `Failed`) and should
/// stop early once `cancel` is raised or a send fails.
pub trait ParseHandler: Send + Sync {
    /// Runs the job.
    fn handle(&self, request: ParseRequest, reply: &ReplySender, cancel: &CancelToken);
}

/// Fetches the presigned body and runs it through the parse pipeline.
pub struct TransferHandler {
    config: Arc<TransferConfig>,
    fetcher: Arc<dyn Fetcher>,
}

impl TransferHandler {
    /// Creates a handler.
    #[must_use]
    pub fn new(config: Arc<TransferConfig>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { config, fetcher }
    }
}

impl ParseHandler for TransferHandler {
    fn handle(&self, request: ParseRequest, reply: &ReplySender, cancel: &CancelToken) {
        let span = tracing::info_span!("bulkport.worker.job", format = %request.format);
        let _enter = span.enter();

        let body = match self.fetcher.fetch(&request.presigned_url) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Fetch failed: {e}");
                reply.send(WorkerEvent::Failed(fetch_failure(&e)));
                return;
            },
        };
        if cancel.is_cancelled() {
            return;
        }

        let options = StreamOptions {
            format: Some(request.format),
            fallback_kind: None,
            total_bytes: Some(body.content_length.unwrap_or(0)),
        };
        let stream = TransferStream::new(
            vec![TransferInput::anonymous(body.bytes)],
            options,
            &self.config,
        );

        for event in stream {
            if cancel.is_cancelled() {
                tracing::debug!("Job cancelled");
                return;
            }
            let event = match event {
                Ok(TransferEvent::Progress(progress)) => WorkerEvent::Progress(progress),
                Ok(TransferEvent::Result(result)) => WorkerEvent::Result(result),
                Err(fatal) => WorkerEvent::Failed(fatal.into()),
            };
            let terminal = !matches!(event, WorkerEvent::Progress(_));
            if !reply.send(event) || terminal {
                return;
            }
        }
    }
}

/// Maps a fetch failure onto the RPC error union.
fn fetch_failure(error: &FetchError) -> PoolError {
    let (code, detail) = match error {
        FetchError::Status(status) => (RowErrorCode::InvalidRecord, status.to_string()),
        FetchError::Transport(reason) => (RowErrorCode::InvalidRecord, reason.clone()),
        FetchError::TooLarge { limit } => (RowErrorCode::TooLarge, format!("exceeds {limit} bytes")),
    };
    PoolError::Parse {
        code: ErrorCode::Row(code),
        ordinal: None,
        detail: Some(detail),
    }
}
