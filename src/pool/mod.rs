//! Isolated worker pool for parsing untrusted remote files.
//!
//! The pool runs `size` workers, each with `concurrency` OS threads, and
//! bounds in-flight calls to `size * concurrency` with a semaphore. A call
//! is dispatched to the least-loaded worker and its events are relayed to
//! the caller as an async stream.
//!
//! # Timeouts
//!
//! Every call gets a hard deadline of `soft_timeout + grace_period` measured
//! from dispatch. If no terminal event arrives by then the stream fails with
//! [`PoolError::Timeout`] and the job is cancelled.
//!
//! Worker capacity travels with the job, not the call: the semaphore permit
//! and the slot's in-flight count are held until the worker thread lets go of
//! the job, so a handler that is slow to honor cancellation keeps its thread
//! reserved and later calls queue for a free one.
//!
//! # Crash containment
//!
//! Jobs run under `catch_unwind`. A panicking handler, or a job whose reply
//! channel closes without a terminal event, surfaces as
//! [`PoolError::WorkerCrash`]; the worker thread keeps serving.
//!
//! # Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `bulkport_workers_active` | gauge | `format`, `operation` |
//! | `bulkport_workers_completions_total` | counter | `format`, `operation`, `outcome` |
//! | `bulkport_workers_duration_ms` | histogram | `format`, `operation` |
//!
//! The three are recorded by a drop guard, so they are emitted whether the
//! call succeeds, fails, times out or is abandoned by the caller.

use crate::config::{PoolConfig, TransferConfig};
use crate::io::Format;
use crate::models::{ParseResult, PoolError, TransferEvent};
use crate::worker::{
    CancelToken, HttpFetcher, ParseHandler, ParseRequest, ReplySender, TransferHandler,
    WorkerEvent,
};
use crate::{Error, Result};
use futures::{Stream, StreamExt};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc as async_mpsc};

/// Events buffered per call before the worker blocks.
const EVENT_BUFFER: usize = 32;

const OPERATION: &str = "parse";

/// Stream of events for one pool call.
pub type ParseStream = Pin<Box<dyn Stream<Item = std::result::Result<TransferEvent, PoolError>> + Send>>;

/// A job queued for a worker.
struct Job {
    request: ParseRequest,
    reply: ReplySender,
    cancel: CancelToken,
    lease: Lease,
}

/// Worker capacity reserved for one job, returned on drop.
struct Lease {
    in_flight: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl Lease {
    fn reserve(slot: &WorkerSlot, permit: OwnedSemaphorePermit) -> Self {
        slot.in_flight.fetch_add(1, Ordering::AcqRel);
        Self {
            in_flight: Arc::clone(&slot.in_flight),
            _permit: permit,
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        // The permit field drops after this, so the slot count is already
        // down when the next caller wakes.
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

struct WorkerSlot {
    id: usize,
    jobs: mpsc::Sender<Job>,
    in_flight: Arc<AtomicUsize>,
}

struct PoolInner {
    config: PoolConfig,
    slots: Vec<WorkerSlot>,
    permits: Arc<Semaphore>,
    active: AtomicUsize,
}

impl PoolInner {
    fn least_loaded(&self) -> usize {
        self.slots
            .iter()
            .enumerate()
            .min_by_key(|(_, slot)| slot.in_flight.load(Ordering::Acquire))
            .map_or(0, |(index, _)| index)
    }
}

/// Pool of parse workers.
///
/// Cheap to clone; clones share the same workers. Worker threads exit once
/// every clone and every outstanding stream is dropped.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Starts a pool that fetches over HTTP and parses with `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn start(config: &TransferConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.pool.total_timeout(), config.limits.download_bytes);
        let handler = TransferHandler::new(Arc::new(config.clone()), Arc::new(fetcher));
        Self::with_handler(config.pool.clone(), Arc::new(handler))
    }

    /// Starts a pool with a custom job handler.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn with_handler(config: PoolConfig, handler: Arc<dyn ParseHandler>) -> Result<Self> {
        let size = config.size.max(1);
        let threads = config.concurrency.max(1);
        let mut slots = Vec::with_capacity(size);

        for id in 0..size {
            let (jobs, receiver) = mpsc::channel::<Job>();
            let receiver = Arc::new(Mutex::new(receiver));
            for n in 0..threads {
                let receiver = Arc::clone(&receiver);
                let handler = Arc::clone(&handler);
                thread::Builder::new()
                    .name(format!("bulkport-worker-{id}-{n}"))
                    .spawn(move || run_worker(id, &receiver, handler.as_ref()))
                    .map_err(|e| Error::operation("spawn_worker", e))?;
            }
            slots.push(WorkerSlot {
                id,
                jobs,
                in_flight: Arc::new(AtomicUsize::new(0)),
            });
        }

        tracing::info!(workers = size, concurrency = threads, "Worker pool started");
        Ok(Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(config.capacity())),
                config,
                slots,
                active: AtomicUsize::new(0),
            }),
        })
    }

    /// Returns the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Returns the number of calls currently dispatched.
    #[must_use]
    pub fn active_calls(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Returns the number of jobs still held by worker threads, including
    /// jobs whose call already ended.
    #[must_use]
    pub fn busy_workers(&self) -> usize {
        self.inner
            .slots
            .iter()
            .map(|slot| slot.in_flight.load(Ordering::Acquire))
            .sum()
    }

    /// Parses the file behind `presigned_url` on a worker.
    ///
    /// The stream yields progress snapshots and ends after one terminal
    /// `Result` or one error. Dropping it cancels the job.
    #[must_use]
    pub fn parse(&self, presigned_url: impl Into<String>, format: Format) -> ParseStream {
        let inner = Arc::clone(&self.inner);
        let request = ParseRequest::new(presigned_url, format);

        Box::pin(async_stream::stream! {
            let Ok(permit) = Arc::clone(&inner.permits).acquire_owned().await else {
                yield Err(PoolError::WorkerCrash {
                    worker_id: 0,
                    reason: "pool closed".to_string(),
                });
                return;
            };

            let slot = inner.least_loaded();
            let worker_id = inner.slots[slot].id;
            let (tx, mut rx) = async_mpsc::channel(EVENT_BUFFER);
            let cancel = CancelToken::new();
            let lease = Lease::reserve(&inner.slots[slot], permit);
            let mut guard = CallGuard::enter(Arc::clone(&inner), format, cancel.clone());

            tracing::debug!(worker_id, format = %format, "Dispatching parse job");

            let job = Job { request, reply: ReplySender::new(tx), cancel, lease };
            if inner.slots[slot].jobs.send(job).is_err() {
                guard.outcome = "crash";
                yield Err(PoolError::WorkerCrash {
                    worker_id,
                    reason: "worker is not accepting jobs".to_string(),
                });
                return;
            }

            let soft_limit = inner.config.soft_timeout;
            let hard_limit = inner.config.total_timeout();
            let deadline = tokio::time::Instant::now() + hard_limit;

            loop {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(WorkerEvent::Progress(progress))) => {
                        yield Ok(TransferEvent::Progress(progress));
                    },
                    Ok(Some(WorkerEvent::Result(result))) => {
                        guard.outcome = "success";
                        yield Ok(TransferEvent::Result(result));
                        break;
                    },
                    Ok(Some(WorkerEvent::Failed(error))) => {
                        guard.outcome = error.outcome();
                        yield Err(error);
                        break;
                    },
                    Ok(Some(WorkerEvent::Crashed { reason })) => {
                        tracing::error!(worker_id, "Worker crashed: {reason}");
                        guard.outcome = "crash";
                        yield Err(PoolError::WorkerCrash { worker_id, reason });
                        break;
                    },
                    Ok(None) => {
                        tracing::error!(worker_id, "Worker channel closed without a result");
                        guard.outcome = "crash";
                        yield Err(PoolError::WorkerCrash {
                            worker_id,
                            reason: "channel closed before a terminal value".to_string(),
                        });
                        break;
                    },
                    Err(_) => {
                        let elapsed_ms = millis(guard.started.elapsed());
                        tracing::warn!(worker_id, elapsed_ms, "Worker call timed out");
                        guard.outcome = "timeout";
                        yield Err(PoolError::Timeout {
                            elapsed_ms,
                            soft_limit_ms: millis(soft_limit),
                            hard_limit_ms: millis(hard_limit),
                        });
                        break;
                    },
                }
            }
        })
    }

    /// Runs a call to completion and returns its terminal result.
    ///
    /// # Errors
    ///
    /// Returns the call's [`PoolError`].
    pub async fn parse_to_result(
        &self,
        presigned_url: impl Into<String>,
        format: Format,
    ) -> std::result::Result<ParseResult, PoolError> {
        let mut stream = self.parse(presigned_url, format);
        while let Some(event) = stream.next().await {
            if let TransferEvent::Result(result) = event? {
                return Ok(result);
            }
        }
        Err(PoolError::WorkerCrash {
            worker_id: 0,
            reason: "stream ended without a result".to_string(),
        })
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("active", &self.active_calls())
            .finish_non_exhaustive()
    }
}

/// Per-call bookkeeping, finalized on drop.
struct CallGuard {
    inner: Arc<PoolInner>,
    format: Format,
    cancel: CancelToken,
    started: Instant,
    outcome: &'static str,
}

impl CallGuard {
    fn enter(inner: Arc<PoolInner>, format: Format, cancel: CancelToken) -> Self {
        inner.active.fetch_add(1, Ordering::AcqRel);
        metrics::gauge!(
            "bulkport_workers_active",
            "format" => format.as_str(),
            "operation" => OPERATION
        )
        .increment(1.0);
        Self {
            inner,
            format,
            cancel,
            started: Instant::now(),
            outcome: "cancelled",
        }
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.inner.active.fetch_sub(1, Ordering::AcqRel);

        let format = self.format.as_str();
        metrics::gauge!("bulkport_workers_active", "format" => format, "operation" => OPERATION)
            .decrement(1.0);
        metrics::counter!(
            "bulkport_workers_completions_total",
            "format" => format,
            "operation" => OPERATION,
            "outcome" => self.outcome
        )
        .increment(1);
        metrics::histogram!(
            "bulkport_workers_duration_ms",
            "format" => format,
            "operation" => OPERATION
        )
        .record(self.started.elapsed().as_secs_f64() * 1000.0);
    }
}

fn run_worker(id: usize, receiver: &Mutex<mpsc::Receiver<Job>>, handler: &dyn ParseHandler) {
    loop {
        let next = match receiver.lock() {
            Ok(jobs) => jobs.recv(),
            Err(_) => break,
        };
        let Ok(Job {
            request,
            reply,
            cancel,
            lease,
        }) = next
        else {
            break;
        };
        if cancel.is_cancelled() {
            continue;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.handle(request, &reply, &cancel);
        }));
        if let Err(payload) = outcome {
            let reason = panic_message(payload.as_ref());
            tracing::error!(worker_id = id, "Parse job panicked: {reason}");
            reply.send(WorkerEvent::Crashed { reason });
        }
        drop(lease);
    }
    tracing::debug!(worker_id = id, "Worker thread exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_string())
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
