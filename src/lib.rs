//! # anvil-pool
//!
//! A bounded async worker pool for Rust applications.
//!
//! ## Features
//!
//! - **Fixed worker pool**: N workers share one bounded FIFO queue
//! - **Backpressure**: Producers wait for a free slot instead of failing when the queue is full
//! - **Automatic retries**: Failed jobs come back after an exponentially growing delay
//! - **Graceful shutdown**: Close to drain the queue, or cancel to stop dequeuing right away
//! - **Observability**: Structured `tracing` logs and counter snapshots
//!
//! ## Quick Start
//!
//! ```rust
//! use anvil_pool::prelude::*;
//! use std::time::Duration;
//!
//! async fn send_email(ctx: JobContext) -> AnvilResult<()> {
//!     if ctx.attempt < 2 {
//!         return Err(AnvilError::job_failed("smtp unavailable"));
//!     }
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> AnvilResult<()> {
//!     let pool = WorkerPool::new(3)?;
//!     let shutdown = ShutdownController::new();
//!     pool.start(shutdown.signal())?;
//!
//!     let job = Job::builder("SendEmail", send_email)
//!         .attempts(3)
//!         .retry_delay(Duration::from_millis(10))
//!         .build();
//!     pool.submit(job).await?;
//!
//!     tokio::time::sleep(Duration::from_millis(200)).await;
//!     pool.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod job;
pub mod queue;
pub mod shutdown;
pub mod utils;

pub mod prelude {
    pub use crate::config::*;
    pub use crate::core::{PoolStats, ShutdownReport, WorkerPool};
    pub use crate::error::{AnvilError, AnvilResult};
    pub use crate::job::{Job, JobAction, JobBuilder, JobContext, JobId, JobOptions};
    pub use crate::queue::Lifecycle;
    pub use crate::shutdown::{ShutdownController, ShutdownSignal};
    pub use async_trait::async_trait;
}

pub use crate::config::*;
pub use crate::core::{PoolStats, ShutdownReport, WorkerPool};
pub use crate::error::{AnvilError, AnvilResult};
pub use crate::job::{Job, JobAction, JobBuilder, JobContext, JobId, JobOptions};
pub use crate::queue::Lifecycle;
pub use crate::shutdown::{ShutdownController, ShutdownSignal};
pub use async_trait::async_trait;
