// crates/jobs/src/error.rs
//! Error types for job control.

use std::time::Duration;

use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Errors returned by [`JobManager`](crate::JobManager) operations.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("maximum number of jobs reached ({max})")]
    CapacityExceeded { max: usize },

    #[error("failed to launch '{command}': {source}")]
    LaunchFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job {id} is {actual}, expected {expected}")]
    InvalidState {
        id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("timed out after {timeout:?} waiting for job {id}")]
    Timeout { id: JobId, timeout: Duration },
}

impl JobError {
    /// Stable short code for this error, for log correlation.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::CapacityExceeded { .. } => "JOB001",
            JobError::LaunchFailed { .. } => "JOB002",
            JobError::NotFound(_) => "JOB003",
            JobError::InvalidState { .. } => "JOB004",
            JobError::Timeout { .. } => "JOB005",
        }
    }
}

/// A signal could not be delivered for a reason other than the target having exited.
#[derive(Debug, Error)]
#[error("failed to send {signal} to {target} {pid}: {errno}")]
pub struct SignalError {
    pub signal: &'static str,
    pub target: &'static str,
    pub pid: u32,
    #[source]
    pub errno: nix::errno::Errno,
}

/// Errors loading or validating [`JobsConfig`](crate::JobsConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

pub type Result<T> = std::result::Result<T, JobError>;
