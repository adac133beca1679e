//! Worker implementation.
//!
//! A worker pulls jobs from the shared queue and runs them one at a time.
//! Failed jobs with retry budget left go to the retry scheduler; the worker
//! never waits for a backoff itself.

use crate::core::scheduler::RetryScheduler;
use crate::error::{AnvilError, AnvilResult};
use crate::job::Job;
use crate::queue::JobQueue;
use crate::shutdown::ShutdownSignal;
use crate::utils::calculate_backoff;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Result of a single job attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    /// Action returned `Ok`
    Success,
    /// Action returned an error or panicked
    Failed(String),
    /// Action exceeded the job timeout and was aborted
    Timeout,
}

/// Why a worker loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The shutdown signal fired
    Cancelled,
    /// The queue was closed and fully drained
    QueueClosed,
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Jobs accepted by `submit`, retries included
    pub submitted: u64,
    /// Submissions rejected because the pool was closed
    pub rejected: u64,
    /// Attempts that succeeded
    pub completed: u64,
    /// Attempts that failed (errors, panics, timeouts)
    pub failed_attempts: u64,
    /// Retries handed to the scheduler
    pub retries_scheduled: u64,
    /// Jobs dropped after exhausting their retry budget
    pub abandoned: u64,
    /// Workers currently running their loop
    pub active_workers: usize,
    /// Jobs waiting in the queue
    pub queued: usize,
}

/// Lock-free counters shared by the pool and its workers
#[derive(Debug, Default)]
pub struct StatsCounters {
    pub submitted: AtomicU64,
    pub rejected: AtomicU64,
    pub completed: AtomicU64,
    pub failed_attempts: AtomicU64,
    pub retries_scheduled: AtomicU64,
    pub abandoned: AtomicU64,
    pub active_workers: AtomicUsize,
}

impl StatsCounters {
    pub fn snapshot(&self, queued: usize) -> PoolStats {
        PoolStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            queued,
        }
    }
}

/// Action task of the attempt in flight. Dropping it aborts the task, so a
/// worker aborted mid-attempt does not leave its action running.
struct AttemptTask(JoinHandle<AnvilResult<()>>);

impl Drop for AttemptTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Individual worker that processes jobs
pub struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
    retries: Arc<RetryScheduler>,
    stats: Arc<StatsCounters>,
    job_timeout: Option<Duration>,
}

impl Worker {
    /// Create a new worker with the given ID
    pub fn new(
        id: usize,
        queue: Arc<JobQueue>,
        retries: Arc<RetryScheduler>,
        stats: Arc<StatsCounters>,
        job_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            queue,
            retries,
            stats,
            job_timeout,
        }
    }

    /// Run the worker loop until the signal fires or the queue is drained after close.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> WorkerExit {
        tracing::info!(worker_id = self.id, "Worker starting");
        self.stats.active_workers.fetch_add(1, Ordering::Relaxed);

        let exit = loop {
            let job = tokio::select! {
                biased;
                _ = shutdown.triggered() => break WorkerExit::Cancelled,
                job = self.queue.pop() => job,
            };

            match job {
                Some(job) => self.process(job, &shutdown).await,
                None => break WorkerExit::QueueClosed,
            }
        };

        self.stats.active_workers.fetch_sub(1, Ordering::Relaxed);
        match exit {
            WorkerExit::Cancelled => {
                tracing::info!(worker_id = self.id, "Worker received shutdown signal")
            }
            WorkerExit::QueueClosed => {
                tracing::info!(worker_id = self.id, "Worker stopping, queue closed and drained")
            }
        }
        exit
    }

    /// Run one attempt of `job` and route the outcome.
    async fn process(&self, job: Job, shutdown: &ShutdownSignal) {
        let age = job.created_at().elapsed().unwrap_or_default();
        if job.retried() > 0 {
            tracing::info!(
                worker_id = self.id,
                job_id = %job.id(),
                key = job.key(),
                age = ?age,
                "Retrying job (attempt {}/{})",
                job.retried(),
                job.max_attempts()
            );
        } else {
            tracing::info!(
                worker_id = self.id,
                job_id = %job.id(),
                key = job.key(),
                queued_for = ?age,
                "Starting job"
            );
        }

        let started = Instant::now();
        let result = self.execute(&job, shutdown.clone()).await;
        let elapsed = started.elapsed();

        match result {
            AttemptResult::Success => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    worker_id = self.id,
                    job_id = %job.id(),
                    key = job.key(),
                    "Finished job in {:?}",
                    elapsed
                );
            }
            AttemptResult::Failed(reason) => self.handle_failure(job, &reason),
            AttemptResult::Timeout => {
                let reason = match self.job_timeout {
                    Some(limit) => AnvilError::Timeout {
                        key: job.key().to_string(),
                        timeout_secs: limit.as_secs(),
                    }
                    .to_string(),
                    None => "timed out".to_string(),
                };
                self.handle_failure(job, &reason)
            }
        }
    }

    /// Run the action on its own task so a panic is contained.
    async fn execute(&self, job: &Job, shutdown: ShutdownSignal) -> AttemptResult {
        let action = job.action();
        let ctx = job.context(shutdown);
        let mut task = AttemptTask(tokio::spawn(async move { action.run(ctx).await }));

        let joined = match self.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task.0).await {
                Ok(joined) => joined,
                Err(_) => return AttemptResult::Timeout,
            },
            None => (&mut task.0).await,
        };

        match joined {
            Ok(Ok(())) => AttemptResult::Success,
            Ok(Err(error)) => AttemptResult::Failed(error.to_string()),
            Err(join_error) => AttemptResult::Failed(format!("job panicked: {}", join_error)),
        }
    }

    fn handle_failure(&self, job: Job, reason: &str) {
        self.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);

        if !job.can_retry() {
            self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                worker_id = self.id,
                job_id = %job.id(),
                key = job.key(),
                retried = job.retried(),
                "Cannot process job: {}. Retry budget exhausted, abandoning",
                reason
            );
            return;
        }

        let delay = calculate_backoff(job.retried(), job.retry_delay());
        let job = job.into_retry();
        tracing::error!(
            worker_id = self.id,
            job_id = %job.id(),
            key = job.key(),
            "Job failed: {}. Retrying in {:?} (attempt {}/{})",
            reason,
            delay,
            job.retried(),
            job.max_attempts()
        );

        match self.retries.schedule(job, delay) {
            Ok(()) => {
                self.stats.retries_scheduled.fetch_add(1, Ordering::Relaxed);
            }
            Err(job) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    worker_id = self.id,
                    job_id = %job.id(),
                    key = job.key(),
                    "Cannot retry job, the pool was closed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::error::AnvilResult;
    use crate::job::{JobAction, JobContext};
    use crate::shutdown::ShutdownController;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use tokio_test::assert_ok;

    struct Flaky {
        calls: Arc<AtomicU32>,
        failures: u32,
    }

    #[async_trait]
    impl JobAction for Flaky {
        async fn run(&self, _ctx: JobContext) -> AnvilResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(AnvilError::job_failed("flaky"))
            } else {
                Ok(())
            }
        }
    }

    struct Panics;

    #[async_trait]
    impl JobAction for Panics {
        async fn run(&self, _ctx: JobContext) -> AnvilResult<()> {
            panic!("boom");
        }
    }

    struct Sleeps(Duration);

    #[async_trait]
    impl JobAction for Sleeps {
        async fn run(&self, _ctx: JobContext) -> AnvilResult<()> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    /// Sleeps, then records that it ran to completion.
    struct Finishes {
        work: Duration,
        done: Arc<AtomicBool>,
    }

    #[async_trait]
    impl JobAction for Finishes {
        async fn run(&self, _ctx: JobContext) -> AnvilResult<()> {
            tokio::time::sleep(self.work).await;
            self.done.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    type Harness = (
        Worker,
        Arc<JobQueue>,
        Arc<RetryScheduler>,
        Arc<StatsCounters>,
    );

    fn worker(job_timeout: Option<Duration>) -> Harness {
        let queue = Arc::new(JobQueue::new(&QueueConfig::default().with_capacity(8)));
        let retries = Arc::new(RetryScheduler::new());
        let stats = Arc::new(StatsCounters::default());
        let worker = Worker::new(
            0,
            Arc::clone(&queue),
            Arc::clone(&retries),
            Arc::clone(&stats),
            job_timeout,
        );
        (worker, queue, retries, stats)
    }

    #[tokio::test]
    async fn test_failure_schedules_retry_with_incremented_counter() {
        let (worker, _queue, retries, stats) = worker(None);
        let calls = Arc::new(AtomicU32::new(0));
        let job = Job::builder(
            "flaky",
            Flaky {
                calls: Arc::clone(&calls),
                failures: 1,
            },
        )
        .attempts(2)
        .build();

        worker.process(job, &ShutdownSignal::never()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(retries.pending(), 1);
        let snapshot = stats.snapshot(0);
        assert_eq!(snapshot.failed_attempts, 1);
        assert_eq!(snapshot.retries_scheduled, 1);
        assert_eq!(snapshot.abandoned, 0);
    }

    #[tokio::test]
    async fn test_retry_refused_once_scheduler_stops() {
        let (worker, _queue, retries, stats) = worker(None);
        retries.stop_when_idle();
        let job = Job::builder(
            "flaky",
            Flaky {
                calls: Arc::new(AtomicU32::new(0)),
                failures: 1,
            },
        )
        .attempts(1)
        .build();

        worker.process(job, &ShutdownSignal::never()).await;

        assert_eq!(retries.pending(), 0);
        let snapshot = stats.snapshot(0);
        assert_eq!(snapshot.retries_scheduled, 0);
        assert_eq!(snapshot.rejected, 1);
    }

    #[tokio::test]
    async fn test_no_budget_means_abandon() {
        let (worker, _queue, retries, stats) = worker(None);
        let calls = Arc::new(AtomicU32::new(0));
        let job = Job::new(
            "flaky",
            Flaky {
                calls: Arc::clone(&calls),
                failures: u32::MAX,
            },
        );

        worker.process(job, &ShutdownSignal::never()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(retries.pending(), 0);
        assert_eq!(stats.snapshot(0).abandoned, 1);
    }

    #[tokio::test]
    async fn test_panic_counts_as_failure() {
        let (worker, _queue, _retries, _stats) = worker(None);
        let job = Job::new("panics", Panics);

        let result = worker.execute(&job, ShutdownSignal::never()).await;
        assert!(matches!(result, AttemptResult::Failed(reason) if reason.contains("panicked")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_attempt() {
        let (worker, _queue, _retries, stats) = worker(Some(Duration::from_secs(1)));
        let job = Job::new("slow", Sleeps(Duration::from_secs(60)));

        worker.process(job, &ShutdownSignal::never()).await;

        let snapshot = stats.snapshot(0);
        assert_eq!(snapshot.completed, 0);
        assert_eq!(snapshot.failed_attempts, 1);
        assert_eq!(snapshot.abandoned, 1);
    }

    #[tokio::test]
    async fn test_run_exits_when_queue_closed_and_drained() {
        let (worker, queue, _retries, stats) = worker(None);
        let calls = Arc::new(AtomicU32::new(0));
        for key in ["a", "b"] {
            assert_ok!(queue.try_push(Job::new(
                key,
                Flaky {
                    calls: Arc::clone(&calls),
                    failures: 0,
                },
            )));
        }
        queue.close();

        let exit = worker.run(ShutdownSignal::never()).await;

        assert_eq!(exit, WorkerExit::QueueClosed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.snapshot(0).completed, 2);
        assert_eq!(stats.snapshot(0).active_workers, 0);
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown_leaving_queue() {
        let (worker, queue, _retries, _stats) = worker(None);
        let controller = ShutdownController::new();
        controller.trigger();
        assert_ok!(queue.try_push(Job::new("left-behind", Sleeps(Duration::ZERO))));

        let exit = worker.run(controller.signal()).await;

        assert_eq!(exit, WorkerExit::Cancelled);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborting_worker_cancels_running_action() {
        let (worker, queue, _retries, stats) = worker(None);
        let done = Arc::new(AtomicBool::new(false));
        assert_ok!(queue.try_push(Job::new(
            "long",
            Finishes {
                work: Duration::from_secs(30),
                done: Arc::clone(&done),
            },
        )));

        let handle = tokio::spawn(worker.run(ShutdownSignal::never()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(queue.is_empty());

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(!done.load(Ordering::SeqCst));
        assert_eq!(stats.snapshot(0).completed, 0);
    }
}
