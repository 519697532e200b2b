//! Error types for Benchwrap
//!
//! This module defines all error types used throughout the pipeline.
//! Caller-input errors fail before anything is submitted; scheduler errors
//! after submission carry enough state to inspect the job by hand.

use crate::monitor::JobHandle;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Benchwrap operations
#[derive(Error, Debug)]
pub enum BenchwrapError {
    /// I/O error during catalog or run-store operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        /// File or directory being accessed
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// Benchmark name not present in the catalog
    #[error("Benchmark not found: {0}")]
    NotFound(String),

    /// Benchmark name already present in the catalog
    #[error("Benchmark '{0}' already exists")]
    DuplicateName(String),

    /// Prefix matched more than one benchmark
    #[error("Ambiguous benchmark name '{query}', candidates: {}", candidates.join(", "))]
    AmbiguousName {
        /// Prefix given by the caller
        query: String,
        /// Every benchmark name the prefix matched
        candidates: Vec<String>,
    },

    /// Benchmark source is not a usable template
    #[error("Invalid benchmark template at '{path}': {reason}")]
    InvalidTemplate {
        /// Template directory or script
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// Resolved resource request is inconsistent
    #[error("Invalid resource request for '{benchmark}': {reason}")]
    InvalidResourceRequest {
        /// Benchmark the request was resolved for
        benchmark: String,
        /// Constraint that failed
        reason: String,
    },

    /// Scheduler rejected the submission
    #[error("Submission failed: {0}")]
    Submission(String),

    /// A single scheduler query failed (transient)
    #[error("Scheduler query '{command}' failed: {message}")]
    SchedulerQuery {
        /// Scheduler command that was run
        command: String,
        /// Its stderr or the spawn failure
        message: String,
    },

    /// Scheduler stayed unreachable past the retry budget
    #[error("Scheduler unavailable after {attempts} consecutive failed polls of job {} (last state {})", last_known.job_id(), last_known.state())]
    SchedulerUnavailable {
        /// Consecutive failed polls
        attempts: u32,
        /// Job as it was last observed
        last_known: Box<JobHandle>,
    },

    /// An append-only run record field was written twice
    #[error("Run record field '{0}' is already set")]
    RecordFieldAlreadySet(&'static str),

    /// Telemetry artifact could not be used
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record or manifest (de)serialization error
    #[error("Record error: {0}")]
    Record(String),

    /// Operation cancelled by user
    #[error("Operation cancelled")]
    Cancelled,
}

impl BenchwrapError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid template error
    pub fn invalid_template(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid resource request error
    pub fn invalid_resources(benchmark: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResourceRequest {
            benchmark: benchmark.into(),
            reason: reason.into(),
        }
    }

    /// Create a scheduler query error
    pub fn query(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchedulerQuery {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check if this error is transient (the next poll may succeed)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SchedulerQuery { .. } | Self::Io { .. })
    }

    /// Check if this error was caused by caller input and happened before submission
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::DuplicateName(_)
                | Self::AmbiguousName { .. }
                | Self::InvalidTemplate { .. }
                | Self::InvalidResourceRequest { .. }
        )
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } | Self::InvalidTemplate { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for Benchwrap operations
pub type Result<T> = std::result::Result<T, BenchwrapError>;

impl From<std::io::Error> for BenchwrapError {
    fn from(err: std::io::Error) -> Self {
        BenchwrapError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for BenchwrapError {
    fn from(err: serde_json::Error) -> Self {
        BenchwrapError::Record(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| BenchwrapError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = BenchwrapError::io("/test/path", io_err);
        assert_eq!(err.path(), Some(&PathBuf::from("/test/path")));
    }

    #[test]
    fn test_error_classification() {
        assert!(BenchwrapError::query("squeue", "timed out").is_retryable());
        assert!(!BenchwrapError::Submission("rejected".into()).is_retryable());

        assert!(BenchwrapError::DuplicateName("stream".into()).is_caller_error());
        assert!(!BenchwrapError::Cancelled.is_caller_error());
    }

    #[test]
    fn test_ambiguous_name_lists_candidates() {
        let err = BenchwrapError::AmbiguousName {
            query: "flops".into(),
            candidates: vec!["flops_a".into(), "flops_b".into()],
        };
        assert_eq!(
            err.to_string(),
            "Ambiguous benchmark name 'flops', candidates: flops_a, flops_b"
        );
    }
}
