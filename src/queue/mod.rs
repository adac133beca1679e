//! Bounded FIFO job queue shared by the workers of a pool.
//!
//! The queue couples the pool lifecycle with the sending half of a bounded
//! `tokio::sync::mpsc` channel. Both live behind a single mutex, so checking
//! that the pool is open and handing the job to the channel happen in one
//! critical section, and `close` can never race a send onto a closed channel.
//!
//! Producers that find the queue full park on a [`Notify`] that workers signal
//! after every dequeue. The wait is bounded by a timeout that doubles on each
//! round, starting from [`QueueConfig::backpressure_initial_ms`].

use crate::config::{DurationExt, QueueConfig};
use crate::error::{AnvilError, AnvilResult};
use crate::job::Job;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

/// Lifecycle of a pool. `Open -> Closed` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Accepting submissions
    Open,
    /// Terminal; submissions are rejected
    Closed,
}

/// Why a non-blocking push did not enqueue the job. The job is handed back.
#[derive(Debug)]
pub enum PushRejected {
    /// No free slot right now
    Full(Job),
    /// The queue has been closed
    Closed(Job),
}

struct QueueState {
    lifecycle: Lifecycle,
    sender: Option<mpsc::Sender<Job>>,
}

/// Bounded, closable FIFO of pending jobs.
pub struct JobQueue {
    state: Mutex<QueueState>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Job>>,
    space: Notify,
    len: AtomicUsize,
    capacity: usize,
    backpressure_initial: Duration,
    backpressure_max: Duration,
}

impl JobQueue {
    /// Create an open queue. `config.capacity` must be positive.
    pub fn new(config: &QueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity);

        Self {
            state: Mutex::new(QueueState {
                lifecycle: Lifecycle::Open,
                sender: Some(sender),
            }),
            receiver: tokio::sync::Mutex::new(receiver),
            space: Notify::new(),
            len: AtomicUsize::new(0),
            capacity: config.capacity,
            backpressure_initial: config.backpressure_initial_ms.millis(),
            backpressure_max: config.backpressure_max_ms.millis(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state().lifecycle
    }

    /// Number of jobs waiting to be picked up.
    ///
    /// The counter is bumped before a send and dropped after a receive, so it
    /// never underflows; a slot freed by a receive can be refilled before the
    /// decrement lands, hence the clamp.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire).min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue without waiting.
    pub fn try_push(&self, job: Job) -> Result<(), PushRejected> {
        let state = self.state();
        let sender = match (&state.lifecycle, &state.sender) {
            (Lifecycle::Open, Some(sender)) => sender,
            _ => return Err(PushRejected::Closed(job)),
        };

        // Count first: a worker may receive the job before try_send returns.
        self.len.fetch_add(1, Ordering::AcqRel);
        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.len.fetch_sub(1, Ordering::AcqRel);
                Err(PushRejected::Full(job))
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.len.fetch_sub(1, Ordering::AcqRel);
                Err(PushRejected::Closed(job))
            }
        }
    }

    /// Enqueue, waiting for a free slot while the queue is full.
    ///
    /// Never gives up while the queue is open. Returns
    /// [`AnvilError::PoolClosed`] once the queue is closed, including when it
    /// closes while this call is waiting.
    pub async fn push(&self, mut job: Job) -> AnvilResult<()> {
        let mut wait = self.backpressure_initial;

        loop {
            // Register before trying so a slot freed in between is not missed.
            let space = self.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            match self.try_push(job) {
                Ok(()) => return Ok(()),
                Err(PushRejected::Closed(rejected)) => {
                    return Err(AnvilError::PoolClosed {
                        key: rejected.key().to_string(),
                    });
                }
                Err(PushRejected::Full(rejected)) => {
                    job = rejected;
                    tracing::debug!(
                        key = job.key(),
                        capacity = self.capacity,
                        "Job queue is full, waiting up to {:?}",
                        wait
                    );

                    let _ = tokio::time::timeout(wait, space).await;
                    wait = wait.saturating_mul(2).min(self.backpressure_max);
                }
            }
        }
    }

    /// Wait for the next job.
    ///
    /// Returns `None` once the queue is closed and every queued job has been
    /// handed out.
    pub async fn pop(&self) -> Option<Job> {
        let job = {
            let mut receiver = self.receiver.lock().await;
            receiver.recv().await
        };

        if job.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
            self.space.notify_waiters();
        }
        job
    }

    /// Close the queue. Returns `true` only for the call that closed it.
    ///
    /// Jobs already queued stay available to [`pop`](Self::pop).
    pub fn close(&self) -> bool {
        let closed = {
            let mut state = self.state();
            if state.lifecycle == Lifecycle::Closed {
                false
            } else {
                state.lifecycle = Lifecycle::Closed;
                state.sender.take();
                true
            }
        };

        if closed {
            // Let producers stuck on a full queue observe the new state.
            self.space.notify_waiters();
        }
        closed
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("lifecycle", &self.lifecycle())
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
