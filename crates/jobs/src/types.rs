// crates/jobs/src/types.rs
//! Plain data types shared by the job-control modules.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Unique identifier for a job within one [`JobManager`](crate::JobManager).
pub type JobId = u64;

/// Lifecycle status of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Stopped,
    Completed,
    Failed,
}

impl JobStatus {
    /// `Completed` and `Failed` never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Stopped => write!(f, "Stopped"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// How the monitor classified a finished process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited with code 0.
    Completed,
    /// Terminated by a signal (exit code sentinel `-1`).
    Signaled,
    /// Exited non-zero, or could not be waited on (`-1`).
    Failed(i32),
}

impl ExitOutcome {
    pub fn status(self) -> JobStatus {
        match self {
            ExitOutcome::Completed => JobStatus::Completed,
            ExitOutcome::Signaled => JobStatus::Stopped,
            ExitOutcome::Failed(_) => JobStatus::Failed,
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            ExitOutcome::Completed => 0,
            ExitOutcome::Signaled => -1,
            ExitOutcome::Failed(code) => code,
        }
    }
}

/// Point-in-time copy of a job, for UI layers and serialization.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub command: String,
    pub status: JobStatus,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub background: bool,
}

/// Lifecycle notifications broadcast by the manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum JobEvent {
    Started(JobSnapshot),
    Stopped(JobSnapshot),
    Continued(JobSnapshot),
    KillRequested(JobSnapshot),
    Finished(JobSnapshot),
}

impl JobEvent {
    pub fn snapshot(&self) -> &JobSnapshot {
        match self {
            JobEvent::Started(s)
            | JobEvent::Stopped(s)
            | JobEvent::Continued(s)
            | JobEvent::KillRequested(s)
            | JobEvent::Finished(s) => s,
        }
    }
}
