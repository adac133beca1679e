//! Job definition, execution trait and builder.

use crate::error::AnvilResult;
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Unique identifier for a job, shared by every retry of the same job
pub type JobId = String;

/// Default base delay between retries
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Information handed to a job action for each execution attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job identifier
    pub id: JobId,
    /// Caller supplied key
    pub key: String,
    /// Number of retries made before this attempt (0 on the first run)
    pub attempt: u32,
    /// Shutdown signal of the pool running this job
    pub shutdown: ShutdownSignal,
}

/// Trait for the work a job performs.
///
/// The pool never interrupts a running action when it shuts down; long
/// running actions can watch `ctx.shutdown` to stop early.
///
/// Async functions and closures taking a [`JobContext`] implement this trait:
///
/// ```rust
/// use anvil_pool::prelude::*;
///
/// async fn send_email(ctx: JobContext) -> AnvilResult<()> {
///     tracing::info!("sending for {}", ctx.key);
///     Ok(())
/// }
///
/// let job = Job::new("SendEmail", send_email);
/// assert_eq!(job.max_attempts(), 0);
/// ```
#[async_trait]
pub trait JobAction: Send + Sync {
    /// Run one attempt of the job.
    async fn run(&self, ctx: JobContext) -> AnvilResult<()>;
}

#[async_trait]
impl<F, Fut> JobAction for F
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = AnvilResult<()>> + Send + 'static,
{
    async fn run(&self, ctx: JobContext) -> AnvilResult<()> {
        (self)(ctx).await
    }
}

/// Retry settings applied when building a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Maximum number of retries after the first attempt (0 = never retry)
    pub attempts: u32,
    /// Base delay for exponential backoff
    pub retry_delay: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// One schedulable, retryable unit of work.
///
/// Everything but the retry counter is fixed at construction. A retry moves
/// the job back into the queue with the counter bumped by one.
#[derive(Clone)]
pub struct Job {
    id: JobId,
    key: String,
    action: Arc<dyn JobAction>,
    retried: u32,
    max_attempts: u32,
    retry_delay: Duration,
    created_at: SystemTime,
}

impl Job {
    /// Create a job with default options.
    pub fn new(key: impl Into<String>, action: impl JobAction + 'static) -> Self {
        Self::builder(key, action).build()
    }

    /// Start building a job.
    pub fn builder(key: impl Into<String>, action: impl JobAction + 'static) -> JobBuilder {
        JobBuilder {
            key: key.into(),
            action: Arc::new(action),
            options: JobOptions::default(),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Retries already made.
    pub fn retried(&self) -> u32 {
        self.retried
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Whether another retry is allowed.
    pub fn can_retry(&self) -> bool {
        self.retried < self.max_attempts
    }

    pub(crate) fn action(&self) -> Arc<dyn JobAction> {
        Arc::clone(&self.action)
    }

    pub(crate) fn context(&self, shutdown: ShutdownSignal) -> JobContext {
        JobContext {
            id: self.id.clone(),
            key: self.key.clone(),
            attempt: self.retried,
            shutdown,
        }
    }

    /// Consume the job, returning the copy that carries the next retry.
    pub(crate) fn into_retry(mut self) -> Self {
        self.retried += 1;
        self
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("retried", &self.retried)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Job`]. Options are applied in call order; no validation.
pub struct JobBuilder {
    key: String,
    action: Arc<dyn JobAction>,
    options: JobOptions,
}

impl JobBuilder {
    /// Set the retry budget.
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.options.attempts = attempts;
        self
    }

    /// Set the backoff base delay.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.options.retry_delay = delay;
        self
    }

    /// Replace all options at once.
    pub fn options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Job {
        Job {
            id: uuid::Uuid::new_v4().to_string(),
            key: self.key,
            action: self.action,
            retried: 0,
            max_attempts: self.options.attempts,
            retry_delay: self.options.retry_delay,
            created_at: SystemTime::now(),
        }
    }
}
