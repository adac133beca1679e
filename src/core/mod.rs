//! The worker pool.
//!
//! [`WorkerPool`] owns the bounded job queue, a fixed set of workers and the
//! retry scheduler, and exposes submission plus the `Open -> Closed`
//! lifecycle.

use crate::config::{DurationExt, PoolConfig};
use crate::error::{AnvilError, AnvilResult};
use crate::job::Job;
use crate::queue::{JobQueue, Lifecycle};
use crate::shutdown::ShutdownSignal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub mod scheduler;
pub mod worker;

pub use scheduler::RetryScheduler;
pub use worker::{AttemptResult, PoolStats, StatsCounters, Worker, WorkerExit};

/// Outcome of waiting for the workers to stop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that exited after their queue was closed and drained
    pub drained: usize,
    /// Workers that exited because the shutdown signal fired
    pub cancelled: usize,
    /// Worker tasks that panicked or were aborted
    pub errors: usize,
    /// Workers still running when the timeout expired
    pub timeouts: usize,
}

struct PoolInner {
    config: PoolConfig,
    queue: Arc<JobQueue>,
    retries: Arc<RetryScheduler>,
    stats: Arc<StatsCounters>,
    started: AtomicBool,
    worker_handles: Mutex<Vec<JoinHandle<WorkerExit>>>,
    scheduler_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PoolInner {
    async fn submit(&self, job: Job) -> AnvilResult<()> {
        let key = job.key().to_string();
        let job_id = job.id().clone();

        match self.queue.push(job).await {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(job_id = %job_id, key = %key, "Job enqueued");
                Ok(())
            }
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(job_id = %job_id, key = %key, "Cannot add job, the pool was closed");
                Err(e)
            }
        }
    }
}

/// A fixed-size pool of workers consuming a shared bounded queue.
///
/// The handle is cheap to clone; clones share the same pool, which makes it
/// easy to submit from spawned tasks.
///
/// # Examples
///
/// ```rust
/// use anvil_pool::prelude::*;
/// use std::time::Duration;
///
/// async fn send_email(ctx: JobContext) -> AnvilResult<()> {
///     tracing::info!("sending {}", ctx.key);
///     Ok(())
/// }
///
/// #[tokio::main]
/// async fn main() -> AnvilResult<()> {
///     let pool = WorkerPool::new(3)?;
///     let shutdown = ShutdownController::new();
///     pool.start(shutdown.signal())?;
///
///     let job = Job::builder("SendEmail", send_email)
///         .attempts(3)
///         .retry_delay(Duration::from_millis(100))
///         .build();
///     pool.submit(job).await?;
///
///     pool.shutdown().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool with `worker_count` workers and default settings otherwise.
    pub fn new(worker_count: usize) -> AnvilResult<Self> {
        let mut config = PoolConfig::default();
        config.workers.num_workers = worker_count;
        Self::with_config(config)
    }

    /// Create a pool from a full configuration.
    pub fn with_config(config: PoolConfig) -> AnvilResult<Self> {
        config
            .validate()
            .map_err(|errors| AnvilError::config(errors.join("; ")))?;

        let queue = Arc::new(JobQueue::new(&config.queue));
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                queue,
                retries: Arc::new(RetryScheduler::new()),
                stats: Arc::new(StatsCounters::default()),
                started: AtomicBool::new(false),
                worker_handles: Mutex::new(Vec::new()),
                scheduler_handle: Mutex::new(None),
            }),
        })
    }

    /// Launch the workers and the retry scheduler. Returns immediately.
    ///
    /// Every worker listens to `shutdown`; when it fires the workers stop
    /// taking jobs, though a job already running is left to finish.
    pub fn start(&self, shutdown: ShutdownSignal) -> AnvilResult<()> {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AnvilError::AlreadyStarted);
        }

        let num_workers = self.inner.config.workers.num_workers;
        let job_timeout = self.inner.config.workers.job_timeout_secs.map(DurationExt::secs);
        tracing::info!("Starting worker pool with {} workers", num_workers);

        let scheduler = {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                let retries = Arc::clone(&inner.retries);
                retries
                    .run(move |job| {
                        let inner = Arc::clone(&inner);
                        async move {
                            // Rejection is already logged and counted by submit.
                            let _ = inner.submit(job).await;
                        }
                    })
                    .await
            })
        };
        *self
            .inner
            .scheduler_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(scheduler);

        let mut handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let worker = Worker::new(
                worker_id,
                Arc::clone(&self.inner.queue),
                Arc::clone(&self.inner.retries),
                Arc::clone(&self.inner.stats),
                job_timeout,
            );
            handles.push(tokio::spawn(worker.run(shutdown.clone())));
            tracing::debug!("Spawned worker {}", worker_id);
        }
        self.inner
            .worker_handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);

        Ok(())
    }

    /// Enqueue a job.
    ///
    /// Rejected with [`AnvilError::PoolClosed`] once the pool is closed.
    /// While the queue is full this waits for a free slot instead of failing.
    pub async fn submit(&self, job: Job) -> AnvilResult<()> {
        self.inner.submit(job).await
    }

    /// Stop accepting jobs. Returns `true` only for the call that closed the pool.
    ///
    /// Jobs already queued are still handed to workers; workers exit once the
    /// queue is drained. Retries that come due later are rejected.
    pub fn close(&self) -> bool {
        let closed = self.inner.queue.close();
        if closed {
            self.inner.retries.stop_when_idle();
            tracing::info!("Worker pool is closed successfully");
        }
        closed
    }

    /// Wait up to `timeout_duration` for every worker to exit.
    ///
    /// Workers still running at the deadline are aborted together with the
    /// action they were executing.
    pub async fn join(&self, timeout_duration: Duration) -> AnvilResult<ShutdownReport> {
        let handles = {
            let mut guard = self
                .inner
                .worker_handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };

        let mut report = ShutdownReport::default();
        if handles.is_empty() {
            return Ok(report);
        }

        tracing::info!(
            "Waiting for {} workers with timeout {:?}",
            handles.len(),
            timeout_duration
        );

        let deadline = tokio::time::Instant::now() + timeout_duration;
        for (i, mut handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(WorkerExit::QueueClosed)) => report.drained += 1,
                Ok(Ok(WorkerExit::Cancelled)) => report.cancelled += 1,
                Ok(Err(e)) => {
                    report.errors += 1;
                    tracing::error!("Worker handle {} error: {}", i, e);
                }
                Err(_) => {
                    report.timeouts += 1;
                    tracing::warn!("Worker handle {} timed out", i);
                    handle.abort();
                }
            }
        }

        tracing::info!("Worker shutdown complete: {:?}", report);
        Ok(report)
    }

    /// Close the pool and wait for the workers using the configured timeout.
    pub async fn shutdown(&self) -> AnvilResult<ShutdownReport> {
        self.close();
        let report = self
            .join(self.inner.config.workers.shutdown_timeout_secs.secs())
            .await?;

        let scheduler = self
            .inner
            .scheduler_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = scheduler {
            let next_due = self.inner.retries.next_ready_at();
            let dropped = self.inner.retries.cancel_all();
            if let Some(next_due) = next_due {
                tracing::warn!(
                    "Dropped {} pending retries on shutdown, the next was due in {:?}",
                    dropped,
                    next_due.saturating_duration_since(tokio::time::Instant::now())
                );
            }
            if timeout(Duration::from_secs(1), handle).await.is_err() {
                tracing::warn!("Retry scheduler did not stop in time");
            }
        }

        Ok(report)
    }

    /// Drop every retry still waiting for its backoff. Returns how many were dropped.
    pub fn cancel_pending_retries(&self) -> usize {
        self.inner.retries.cancel_all()
    }

    /// Retries waiting for their backoff to elapse.
    pub fn pending_retries(&self) -> usize {
        self.inner.retries.pending()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PoolStats {
        self.inner.stats.snapshot(self.inner.queue.len())
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.queue.lifecycle()
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle() == Lifecycle::Closed
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.queue.capacity()
    }

    pub fn worker_count(&self) -> usize {
        self.inner.config.workers.num_workers
    }

    /// Get the configuration used by this pool.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.worker_count())
            .field("queue", &self.inner.queue)
            .field("pending_retries", &self.pending_retries())
            .finish()
    }
}
