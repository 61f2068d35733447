// crates/jobs/src/monitor.rs
//! Per-job monitor task: waits for the child to exit and finalizes the job.

use std::io;
use std::process::ExitStatus;
use std::sync::Arc;

use tokio::process::Child;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::job::Job;
use crate::signal::ProcessSignaler;
use crate::types::{ExitOutcome, JobEvent};

/// Classify the result of waiting on a child.
///
/// A process killed by a signal has no exit code; it maps to the `-1`
/// sentinel and is reported as `Stopped`.
pub fn classify_exit(result: io::Result<ExitStatus>) -> ExitOutcome {
    match result {
        Ok(status) => match status.code() {
            Some(0) => ExitOutcome::Completed,
            Some(code) => ExitOutcome::Failed(code),
            None => ExitOutcome::Signaled,
        },
        Err(_) => ExitOutcome::Failed(-1),
    }
}

/// Start the monitor for a freshly launched job.
///
/// The wait is unbounded. Cancelling the job's token kills the job's whole
/// process group, then the child by handle; the task still waits for the
/// real exit before finalizing.
pub(crate) fn spawn_monitor(
    job: Job,
    mut child: Child,
    signaler: Arc<dyn ProcessSignaler>,
    events: broadcast::Sender<JobEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let token = job.cancel_token().clone();
        let exited = tokio::select! {
            result = child.wait() => Some(result),
            _ = token.cancelled() => None,
        };
        let result = match exited {
            Some(result) => result,
            None => {
                debug!(job_id = job.id(), "Job cancelled, killing process group");
                if let Some(pid) = job.pid() {
                    if let Err(e) = signaler.terminate(pid) {
                        warn!(job_id = job.id(), pid, error = %e, "Group kill failed, killing leader only");
                    }
                }
                if let Err(e) = child.start_kill() {
                    // Already reaped or exiting; the wait below picks it up.
                    debug!(job_id = job.id(), error = %e, "start_kill failed");
                }
                child.wait().await
            }
        };

        if let Err(e) = &result {
            warn!(job_id = job.id(), error = %e, "Failed to wait for job process");
        }
        let outcome = classify_exit(result);
        if job.finish(outcome) {
            info!(
                job_id = job.id(),
                pid = job.pid(),
                status = %job.status(),
                exit_code = outcome.exit_code(),
                duration_ms = job.duration().as_millis() as u64,
                "Job finished"
            );
            // No subscribers is fine.
            let _ = events.send(JobEvent::Finished(job.snapshot()));
        }
    })
}
