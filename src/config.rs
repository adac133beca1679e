//! Configuration types for anvil-pool.
//!
//! This module contains the configuration structures used by the pool,
//! covering worker settings, the bounded queue and logging.

use crate::error::{AnvilError, AnvilResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for a [`WorkerPool`](crate::core::WorkerPool).
///
/// # Examples
///
/// ```rust
/// use anvil_pool::config::{PoolConfig, QueueConfig, WorkerConfig};
///
/// // Use default configuration
/// let config = PoolConfig::default();
///
/// // Custom configuration
/// let config = PoolConfig {
///     workers: WorkerConfig::with_workers(8).with_job_timeout(600),
///     queue: QueueConfig::default().with_capacity(10_000),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Worker-related configuration
    pub workers: WorkerConfig,

    /// Queue configuration
    pub queue: QueueConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of workers to spawn
    pub num_workers: usize,

    /// Maximum time a single job attempt may run before it counts as failed (in seconds)
    pub job_timeout_secs: Option<u64>,

    /// Time to wait for workers to finish on shutdown (in seconds)
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get().max(1),
            job_timeout_secs: None,
            shutdown_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    /// Create a new worker configuration with a specific number of workers.
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Set the per-attempt job timeout.
    pub fn with_job_timeout(mut self, timeout_secs: u64) -> Self {
        self.job_timeout_secs = Some(timeout_secs);
        self
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout_secs: u64) -> Self {
        self.shutdown_timeout_secs = timeout_secs;
        self
    }
}

/// Bounded queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of pending jobs
    pub capacity: usize,

    /// First wait while the queue is full (in milliseconds)
    pub backpressure_initial_ms: u64,

    /// Upper bound for the doubling wait while the queue is full (in milliseconds)
    pub backpressure_max_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            backpressure_initial_ms: 100,
            backpressure_max_ms: 5000,
        }
    }
}

impl QueueConfig {
    /// Set the queue capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the backpressure wait bounds.
    pub fn with_backpressure(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.backpressure_initial_ms = initial_ms;
        self.backpressure_max_ms = max_ms;
        self
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter
    pub level: LogLevel,

    /// Include timestamps in logs
    pub include_timestamps: bool,

    /// Include target module in logs
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_timestamps: true,
            include_targets: false,
        }
    }
}

impl LoggingConfig {
    /// Install a global `tracing` subscriber matching this configuration.
    ///
    /// Fails if a global subscriber is already set.
    pub fn init(&self) -> AnvilResult<()> {
        let builder = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::from(self.level.clone()))
            .with_target(self.include_targets);

        let result = if self.include_timestamps {
            builder.try_init()
        } else {
            builder.without_time().try_init()
        };

        result.map_err(|e| AnvilError::config(format!("failed to install logger: {}", e)))
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Helper trait for converting durations in configuration.
pub trait DurationExt {
    /// Convert seconds to Duration
    fn secs(self) -> Duration;
    /// Convert milliseconds to Duration
    fn millis(self) -> Duration;
}

impl DurationExt for u64 {
    fn secs(self) -> Duration {
        Duration::from_secs(self)
    }

    fn millis(self) -> Duration {
        Duration::from_millis(self)
    }
}

impl PoolConfig {
    /// Parse a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> AnvilResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate().map_err(|errors| AnvilError::config(errors.join("; ")))?;
        Ok(config)
    }

    /// Create a new configuration optimized for development.
    pub fn development() -> Self {
        Self {
            workers: WorkerConfig {
                num_workers: 2,
                job_timeout_secs: Some(60),
                ..Default::default()
            },
            queue: QueueConfig {
                capacity: 100,
                ..Default::default()
            },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                include_targets: true,
                ..Default::default()
            },
        }
    }

    /// Create a new configuration optimized for production.
    pub fn production() -> Self {
        Self {
            workers: WorkerConfig {
                num_workers: num_cpus::get() * 2,
                job_timeout_secs: Some(300),
                shutdown_timeout_secs: 60,
            },
            queue: QueueConfig {
                capacity: 10_000,
                backpressure_initial_ms: 100,
                backpressure_max_ms: 10_000,
            },
            logging: LoggingConfig::default(),
        }
    }

    /// Create a configuration for testing.
    pub fn testing() -> Self {
        Self {
            workers: WorkerConfig {
                num_workers: 1,
                job_timeout_secs: Some(10),
                shutdown_timeout_secs: 5,
            },
            queue: QueueConfig {
                capacity: 10,
                backpressure_initial_ms: 10,
                backpressure_max_ms: 100,
            },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                include_timestamps: false,
                include_targets: true,
            },
        }
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.workers.num_workers == 0 {
            errors.push("Number of workers must be greater than 0".to_string());
        }

        if self.workers.num_workers > 1000 {
            errors.push("Number of workers should not exceed 1000".to_string());
        }

        if self.workers.job_timeout_secs == Some(0) {
            errors.push("Job timeout must be greater than 0".to_string());
        }

        if self.queue.capacity == 0 {
            errors.push("Queue capacity must be greater than 0".to_string());
        }

        if self.queue.backpressure_initial_ms == 0 {
            errors.push("Backpressure initial wait must be greater than 0".to_string());
        }

        if self.queue.backpressure_max_ms < self.queue.backpressure_initial_ms {
            errors.push(
                "Backpressure max wait must be greater than or equal to the initial wait"
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
