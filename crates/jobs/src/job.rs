// crates/jobs/src/job.rs
//! A single background job and its observed lifecycle.
//!
//! [`Job`] is a cheap, cloneable handle. The immutable parts (id, command)
//! live directly in the shared allocation; everything the monitor task or the
//! control operations mutate sits behind one per-job `RwLock`, so a UI thread
//! polling `status()` never contends with the manager's map lock.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::types::{ExitOutcome, JobId, JobSnapshot, JobStatus};

#[derive(Debug)]
struct JobRecord {
    status: JobStatus,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
}

#[derive(Debug)]
struct JobInner {
    id: JobId,
    command: String,
    background: bool,
    record: RwLock<JobRecord>,
    done_tx: watch::Sender<bool>,
    cancel: CancellationToken,
}

/// Read/observe handle to one launched command.
///
/// Only the owning manager and the job's monitor task change its state.
#[derive(Debug, Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    pub(crate) fn new(id: JobId, command: String, cancel: CancellationToken) -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(JobInner {
                id,
                command,
                background: true,
                record: RwLock::new(JobRecord {
                    status: JobStatus::Running,
                    pid: None,
                    started_at: Utc::now(),
                    ended_at: None,
                    exit_code: None,
                }),
                done_tx,
                cancel,
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.id
    }

    /// The literal string handed to the shell.
    pub fn command(&self) -> &str {
        &self.inner.command
    }

    pub fn is_background(&self) -> bool {
        self.inner.background
    }

    pub fn status(&self) -> JobStatus {
        self.read().status
    }

    /// OS process id, known once the launch succeeded.
    pub fn pid(&self) -> Option<u32> {
        self.read().pid
    }

    /// Exit code, only available once the monitor has finalized the job.
    pub fn exit_code(&self) -> Option<i32> {
        self.read().exit_code
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.read().started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.read().ended_at
    }

    /// True once the process has exited and the monitor recorded it.
    pub fn has_exited(&self) -> bool {
        self.read().ended_at.is_some()
    }

    /// Whether the job still occupies a capacity slot.
    pub fn is_active(&self) -> bool {
        let record = self.read();
        record.ended_at.is_none() && !record.status.is_terminal()
    }

    /// Elapsed run time: `end - start` once finished, otherwise live.
    pub fn duration(&self) -> Duration {
        let record = self.read();
        let end = record.ended_at.unwrap_or_else(Utc::now);
        (end - record.started_at).to_std().unwrap_or_default()
    }

    /// One-line rendering used by the `jobs` builtin.
    pub fn describe(&self) -> String {
        let record = self.read();
        let pid = record
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "[{}] {} {} (PID: {})",
            self.inner.id, record.status, self.inner.command, pid
        )
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let record = self.read();
        let end = record.ended_at.unwrap_or_else(Utc::now);
        JobSnapshot {
            job_id: self.inner.id,
            command: self.inner.command.clone(),
            status: record.status,
            pid: record.pid,
            started_at: record.started_at,
            ended_at: record.ended_at,
            exit_code: record.exit_code,
            duration_ms: (end - record.started_at)
                .to_std()
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            background: self.inner.background,
        }
    }

    // -- Crate-private transitions --------------------------------------------

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub(crate) fn completion(&self) -> watch::Receiver<bool> {
        self.inner.done_tx.subscribe()
    }

    pub(crate) fn mark_launched(&self, pid: u32) {
        let mut record = self.write();
        record.pid = Some(pid);
        record.status = JobStatus::Running;
        record.started_at = Utc::now();
    }

    /// Err carries the actual status when the job is not live in `expected`.
    pub(crate) fn ensure_live(&self, expected: JobStatus) -> Result<u32, JobStatus> {
        let record = self.read();
        match record.pid {
            Some(pid) if record.status == expected && record.ended_at.is_none() => Ok(pid),
            _ => Err(record.status),
        }
    }

    /// `from -> to`, unless the monitor finalized the job in the meantime.
    pub(crate) fn transition(&self, from: JobStatus, to: JobStatus) -> Result<(), JobStatus> {
        let mut record = self.write();
        if record.status != from || record.ended_at.is_some() {
            return Err(record.status);
        }
        record.status = to;
        Ok(())
    }

    /// Records the exit and fires the completion signal. Returns false if the
    /// job was already finalized.
    pub(crate) fn finish(&self, outcome: ExitOutcome) -> bool {
        {
            let mut record = self.write();
            if record.ended_at.is_some() {
                return false;
            }
            record.status = outcome.status();
            record.exit_code = Some(outcome.exit_code());
            record.ended_at = Some(Utc::now());
        }
        self.inner.done_tx.send_replace(true);
        true
    }

    fn read(&self) -> RwLockReadGuard<'_, JobRecord> {
        self.inner.record.read().unwrap_or_else(|poisoned| {
            tracing::error!(job_id = self.inner.id, "RwLock poisoned reading job record");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobRecord> {
        self.inner.record.write().unwrap_or_else(|poisoned| {
            tracing::error!(job_id = self.inner.id, "RwLock poisoned writing job record");
            poisoned.into_inner()
        })
    }
}
