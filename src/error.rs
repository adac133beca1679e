//! Error types for anvil-pool operations.

use thiserror::Error;

/// Result type used throughout anvil-pool.
pub type AnvilResult<T> = Result<T, AnvilError>;

/// Main error type for anvil-pool operations.
#[derive(Error, Debug)]
pub enum AnvilError {
    /// The pool was closed before the job could be enqueued
    #[error("Worker pool is closed, job '{key}' rejected")]
    PoolClosed {
        /// Key of the rejected job
        key: String,
    },

    /// `start` was called on a pool that is already running
    #[error("Worker pool already started")]
    AlreadyStarted,

    /// Job execution failed
    #[error("Job execution failed: {message}")]
    JobFailed {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Job ran longer than the configured timeout
    #[error("Job '{key}' timed out after {timeout_secs} seconds")]
    Timeout {
        /// Key of the job that timed out
        key: String,
        /// Timeout duration in seconds
        timeout_secs: u64,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Error message
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl AnvilError {
    /// Create a job failure without an underlying cause.
    pub fn job_failed(message: impl Into<String>) -> Self {
        Self::JobFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a job failure wrapping the error that caused it.
    pub fn job_failed_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::JobFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_job_failed_keeps_source() {
        let io = std::io::Error::other("smtp unreachable");
        let err = AnvilError::job_failed_with("send mail", io);

        assert_eq!(err.to_string(), "Job execution failed: send mail");
        assert_eq!(err.source().unwrap().to_string(), "smtp unreachable");
    }

    #[test]
    fn test_pool_closed_message() {
        let err = AnvilError::PoolClosed {
            key: "SendEmail".to_string(),
        };
        assert!(err.to_string().contains("SendEmail"));
    }
}
