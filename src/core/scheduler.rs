//! Delayed resubmission of failed jobs.
//!
//! Failed jobs with retry budget left are parked in a min-heap keyed by the
//! instant they become ready. A single scheduler task sleeps until the
//! earliest entry is due and hands it back to the pool on its own task, so a
//! full queue never holds up other retries. Time comes from `tokio::time`, so
//! tests can drive the scheduler with a paused clock.

use crate::job::Job;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A job waiting for its backoff to elapse.
#[derive(Debug)]
struct ScheduledRetry {
    ready_at: Instant,
    seq: u64,
    job: Job,
}

impl PartialEq for ScheduledRetry {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for ScheduledRetry {}

impl PartialOrd for ScheduledRetry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledRetry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed so the heap pops the earliest entry; ties go in scheduling order.
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    heap: BinaryHeap<ScheduledRetry>,
    stopping: bool,
}

/// Min-heap of pending retries plus the wake-up plumbing for its driver task.
#[derive(Debug, Default)]
pub struct RetryScheduler {
    state: Mutex<SchedulerState>,
    wake: Notify,
    next_seq: AtomicU64,
}

impl RetryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park `job` until `delay` has elapsed.
    ///
    /// Once [`stop_when_idle`](Self::stop_when_idle) has been called the job
    /// is handed back instead, since its resubmission could only be rejected.
    pub fn schedule(&self, job: Job, delay: Duration) -> Result<(), Job> {
        let ready_at = Instant::now()
            .checked_add(delay)
            .unwrap_or_else(far_future);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        {
            let mut state = self.state();
            if state.stopping {
                return Err(job);
            }
            state.heap.push(ScheduledRetry { ready_at, seq, job });
        }
        self.wake.notify_one();
        Ok(())
    }

    /// Number of retries waiting for their backoff.
    pub fn pending(&self) -> usize {
        self.state().heap.len()
    }

    /// When the next retry becomes due, if any.
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.state().heap.peek().map(|entry| entry.ready_at)
    }

    /// Drop every pending retry, returning how many were dropped.
    pub fn cancel_all(&self) -> usize {
        let dropped = std::mem::take(&mut self.state().heap).len();
        self.wake.notify_one();
        dropped
    }

    /// Refuse new retries and let the driver loop exit once nothing is pending.
    pub fn stop_when_idle(&self) {
        self.state().stopping = true;
        self.wake.notify_one();
    }

    /// Pop every entry due at `now`, earliest first, and report what to do next.
    fn poll_due(&self, now: Instant) -> (Vec<Job>, NextStep) {
        let mut state = self.state();
        let mut due = Vec::new();
        while state.heap.peek().is_some_and(|entry| entry.ready_at <= now) {
            if let Some(entry) = state.heap.pop() {
                due.push(entry.job);
            }
        }

        let next = match state.heap.peek() {
            Some(entry) => NextStep::SleepUntil(entry.ready_at),
            None if state.stopping => NextStep::Exit,
            None => NextStep::Idle,
        };
        (due, next)
    }

    /// Drive the heap until [`stop_when_idle`](Self::stop_when_idle) was
    /// called and nothing is pending. Each due job is passed to `resubmit`,
    /// whose future runs on its own task.
    pub async fn run<F, Fut>(&self, resubmit: F)
    where
        F: Fn(Job) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tracing::debug!("Retry scheduler started");

        loop {
            let wake = self.wake.notified();
            tokio::pin!(wake);
            wake.as_mut().enable();

            let (due, next) = self.poll_due(Instant::now());
            for job in due {
                tracing::debug!(job_id = %job.id(), key = job.key(), "Retry is due, resubmitting");
                tokio::spawn(resubmit(job));
            }

            match next {
                NextStep::SleepUntil(ready_at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(ready_at) => {}
                        _ = &mut wake => {}
                    }
                }
                NextStep::Idle => wake.await,
                NextStep::Exit => break,
            }
        }

        tracing::debug!("Retry scheduler stopped");
    }
}

enum NextStep {
    SleepUntil(Instant),
    Idle,
    Exit,
}

fn far_future() -> Instant {
    // Roughly 30 years, as tokio does for its own "never" deadlines.
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}
