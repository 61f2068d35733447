// crates/jobs/src/manager.rs
//! Registry and control surface for background jobs.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::JobsConfig;
use crate::error::{JobError, Result};
use crate::job::Job;
use crate::monitor::spawn_monitor;
use crate::signal::{kill_process, ProcessSignaler, UnixSignaler};
use crate::types::{JobEvent, JobId, JobStatus};

/// Owns every job launched through it.
///
/// Thread-safe; share it behind an `Arc`. The map lock is only held for
/// lookups and insert/remove, never across spawning, signaling or waiting.
/// Per-job state has its own lock inside [`Job`].
pub struct JobManager {
    config: JobsConfig,
    next_id: AtomicU64,
    jobs: RwLock<BTreeMap<JobId, Job>>,
    signaler: Arc<dyn ProcessSignaler>,
    root_token: CancellationToken,
    events_tx: broadcast::Sender<JobEvent>,
}

impl JobManager {
    /// Create a manager that signals real process groups.
    pub fn new(config: JobsConfig) -> Self {
        Self::with_signaler(config, Arc::new(UnixSignaler))
    }

    pub fn with_signaler(config: JobsConfig, signaler: Arc<dyn ProcessSignaler>) -> Self {
        Self::with_cancellation(config, signaler, CancellationToken::new())
    }

    /// Jobs inherit child tokens of `parent`; cancelling it kills them all.
    pub fn with_cancellation(
        config: JobsConfig,
        signaler: Arc<dyn ProcessSignaler>,
        parent: CancellationToken,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            config,
            next_id: AtomicU64::new(1),
            jobs: RwLock::new(BTreeMap::new()),
            signaler,
            root_token: parent,
            events_tx,
        }
    }

    pub fn config(&self) -> &JobsConfig {
        &self.config
    }

    pub fn max_jobs(&self) -> usize {
        self.config.max_jobs
    }

    /// Number of Running/Stopped jobs whose process has not exited.
    pub fn active_count(&self) -> usize {
        self.read_jobs().values().filter(|j| j.is_active()).count()
    }

    /// Subscribe to lifecycle events for all jobs.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events_tx.subscribe()
    }

    /// Launch `<shell_path> -c <command>` as a new process-group leader.
    ///
    /// Returns as soon as the process is running; the monitor task finalizes
    /// the job when it exits. Must be called from within a Tokio runtime.
    pub fn start_job(&self, command: &str, shell_path: &str) -> Result<Job> {
        let job = {
            let mut jobs = self.write_jobs();
            let active = jobs.values().filter(|j| j.is_active()).count();
            if active >= self.config.max_jobs {
                warn!(active, max_jobs = self.config.max_jobs, "Job capacity reached");
                return Err(JobError::CapacityExceeded {
                    max: self.config.max_jobs,
                });
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let job = Job::new(id, command.to_string(), self.root_token.child_token());
            jobs.insert(id, job.clone());
            job
        };

        let mut cmd = Command::new(shell_path);
        cmd.arg("-c").arg(command).stdin(Stdio::null()).process_group(0);
        if self.config.inherit_output {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let spawned = cmd.spawn().and_then(|child| match child.id() {
            Some(pid) => Ok((child, pid)),
            None => Err(std::io::Error::other("spawned child has no pid")),
        });
        let (child, pid) = match spawned {
            Ok(spawned) => spawned,
            Err(source) => {
                self.write_jobs().remove(&job.id());
                job.cancel_token().cancel();
                warn!(job_id = job.id(), command, shell = shell_path, error = %source, "Failed to launch job");
                return Err(JobError::LaunchFailed {
                    command: command.to_string(),
                    source,
                });
            }
        };

        job.mark_launched(pid);
        info!(job_id = job.id(), pid, command, "Started background job");
        let _ = self.events_tx.send(JobEvent::Started(job.snapshot()));
        spawn_monitor(
            job.clone(),
            child,
            Arc::clone(&self.signaler),
            self.events_tx.clone(),
        );
        Ok(job)
    }

    /// [`start_job`](Self::start_job) with the configured shell.
    pub fn start_job_default_shell(&self, command: &str) -> Result<Job> {
        self.start_job(command, &self.config.shell)
    }

    /// Suspend a running job's process group.
    pub fn stop_job(&self, id: JobId) -> Result<()> {
        self.control(id, JobStatus::Running, JobStatus::Stopped, |pid| {
            self.signaler.suspend(pid)
        })?;
        if let Some(job) = self.get_job(id) {
            let _ = self.events_tx.send(JobEvent::Stopped(job.snapshot()));
        }
        Ok(())
    }

    /// Resume a stopped job's process group.
    pub fn continue_job(&self, id: JobId) -> Result<()> {
        self.control(id, JobStatus::Stopped, JobStatus::Running, |pid| {
            self.signaler.resume(pid)
        })?;
        if let Some(job) = self.get_job(id) {
            let _ = self.events_tx.send(JobEvent::Continued(job.snapshot()));
        }
        Ok(())
    }

    /// Kill a job's whole process group.
    ///
    /// A job that already finished is left alone. The monitor task records
    /// the resulting exit; use [`wait_for_job`](Self::wait_for_job) to
    /// observe it.
    pub fn kill_job(&self, id: JobId) -> Result<()> {
        let job = self.get_job(id).ok_or(JobError::NotFound(id))?;
        if job.has_exited() || job.status().is_terminal() {
            debug!(job_id = id, "Kill on finished job is a no-op");
            return Ok(());
        }

        // The group goes first: once the monitor reaps the leader, only the
        // group id still reaches the rest of a pipeline.
        if let Some(pid) = job.pid() {
            if let Err(e) = self.signaler.terminate(pid) {
                warn!(job_id = id, pid, error = %e, "Group kill failed, killing leader only");
                if let Err(e) = kill_process(pid) {
                    warn!(job_id = id, pid, error = %e, "Failed to kill job process");
                }
            }
        }
        job.cancel_token().cancel();
        info!(job_id = id, "Kill requested");
        let _ = self.events_tx.send(JobEvent::KillRequested(job.snapshot()));
        Ok(())
    }

    pub fn get_job(&self, id: JobId) -> Option<Job> {
        self.read_jobs().get(&id).cloned()
    }

    /// All jobs, in id order.
    pub fn list_jobs(&self) -> Vec<Job> {
        self.read_jobs().values().cloned().collect()
    }

    /// Running/Stopped jobs whose process is still alive, in id order.
    pub fn list_active_jobs(&self) -> Vec<Job> {
        self.read_jobs()
            .values()
            .filter(|j| j.is_active())
            .cloned()
            .collect()
    }

    /// Remove finished jobs that ended at least `max_age` ago.
    ///
    /// This is the only path that deletes job records. Ids are never reused.
    pub fn cleanup_completed(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let mut jobs = self.write_jobs();
        let before = jobs.len();
        jobs.retain(|_, job| match job.ended_at() {
            Some(ended) => ended > cutoff,
            None => true,
        });
        let removed = before - jobs.len();
        if removed > 0 {
            debug!(removed, "Cleaned up finished jobs");
        }
        removed
    }

    /// Block until the job finishes, or fail with [`JobError::Timeout`].
    pub async fn wait_for_job(&self, id: JobId, timeout: Duration) -> Result<()> {
        let job = self.get_job(id).ok_or(JobError::NotFound(id))?;
        let mut done = job.completion();
        let result = match tokio::time::timeout(timeout, done.wait_for(|finished| *finished)).await {
            Ok(_) => Ok(()),
            Err(_) => Err(JobError::Timeout { id, timeout }),
        };
        result
    }

    /// Cancel every outstanding job. Their monitors kill each job's process group.
    pub fn shutdown(&self) {
        info!(active = self.active_count(), "Shutting down job manager");
        self.root_token.cancel();
    }

    /// [`shutdown`](Self::shutdown), then wait up to `timeout` for each
    /// active job to be finalized. Returns the ids that did not finish.
    pub async fn shutdown_and_wait(&self, timeout: Duration) -> Vec<JobId> {
        let active = self.list_active_jobs();
        self.shutdown();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut stragglers = Vec::new();
        for job in active {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if self.wait_for_job(job.id(), remaining).await.is_err() {
                stragglers.push(job.id());
            }
        }
        if !stragglers.is_empty() {
            warn!(?stragglers, "Jobs still running after shutdown");
        }
        stragglers
    }

    /// Periodically sweep finished jobs until the manager shuts down.
    pub fn spawn_cleanup_task(
        self: &Arc<Self>,
        interval: Duration,
        max_age: Duration,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let token = self.root_token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.cleanup_completed(max_age);
                    }
                }
            }
        })
    }

    /// Shared body of stop/continue: check, signal without locks, then
    /// commit the transition unless the monitor finalized the job meanwhile.
    fn control<F>(&self, id: JobId, from: JobStatus, to: JobStatus, send: F) -> Result<()>
    where
        F: FnOnce(u32) -> std::result::Result<(), crate::error::SignalError>,
    {
        let job = self.get_job(id).ok_or(JobError::NotFound(id))?;
        let invalid = |actual: JobStatus| JobError::InvalidState {
            id,
            expected: from,
            actual,
        };
        let pid = job.ensure_live(from).map_err(invalid)?;

        if let Err(e) = send(pid) {
            // Only non-ESRCH failures land here; the state is left unchanged.
            warn!(job_id = id, pid, error = %e, "Failed to signal job");
            return Err(invalid(job.status()));
        }
        job.transition(from, to).map_err(invalid)?;
        info!(job_id = id, pid, status = %to, "Job state changed");
        Ok(())
    }

    fn read_jobs(&self) -> RwLockReadGuard<'_, BTreeMap<JobId, Job>> {
        self.jobs.read().unwrap_or_else(|poisoned| {
            tracing::error!("RwLock poisoned reading jobs map");
            poisoned.into_inner()
        })
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, BTreeMap<JobId, Job>> {
        self.jobs.write().unwrap_or_else(|poisoned| {
            tracing::error!("RwLock poisoned writing jobs map");
            poisoned.into_inner()
        })
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new(JobsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::error::SignalError;
    use crate::types::ExitOutcome;

    /// Records signals instead of delivering them.
    #[derive(Default)]
    struct RecordingSignaler {
        sent: Mutex<Vec<(&'static str, u32)>>,
        fail: bool,
    }

    impl RecordingSignaler {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn record(&self, signal: &'static str, pid: u32) -> std::result::Result<(), SignalError> {
            self.sent.lock().unwrap().push((signal, pid));
            if self.fail {
                return Err(SignalError {
                    signal,
                    target: "process group",
                    pid,
                    errno: nix::errno::Errno::EINVAL,
                });
            }
            Ok(())
        }

        fn sent(&self) -> Vec<&'static str> {
            self.sent.lock().unwrap().iter().map(|(s, _)| *s).collect()
        }
    }

    impl ProcessSignaler for RecordingSignaler {
        fn suspend(&self, pid: u32) -> std::result::Result<(), SignalError> {
            self.record("SIGSTOP", pid)
        }
        fn resume(&self, pid: u32) -> std::result::Result<(), SignalError> {
            self.record("SIGCONT", pid)
        }
        fn terminate(&self, pid: u32) -> std::result::Result<(), SignalError> {
            self.record("SIGKILL", pid)
        }
    }

    fn config(max_jobs: usize) -> JobsConfig {
        JobsConfig {
            max_jobs,
            shell: "/bin/sh".to_string(),
            ..JobsConfig::default()
        }
    }

    fn fake_manager(max_jobs: usize) -> (JobManager, Arc<RecordingSignaler>) {
        let signaler = Arc::new(RecordingSignaler::default());
        let manager = JobManager::with_signaler(config(max_jobs), signaler.clone());
        (manager, signaler)
    }

    #[tokio::test]
    async fn test_stop_continue_state_machine() {
        let (manager, signaler) = fake_manager(4);
        let job = manager.start_job("sleep 5", "/bin/sh").unwrap();
        let id = job.id();

        manager.stop_job(id).unwrap();
        assert_eq!(job.status(), JobStatus::Stopped);
        assert!(matches!(
            manager.stop_job(id),
            Err(JobError::InvalidState {
                expected: JobStatus::Running,
                actual: JobStatus::Stopped,
                ..
            })
        ));

        manager.continue_job(id).unwrap();
        assert_eq!(job.status(), JobStatus::Running);
        assert_eq!(job.exit_code(), None);
        assert_eq!(job.ended_at(), None);
        assert!(matches!(
            manager.continue_job(id),
            Err(JobError::InvalidState { .. })
        ));
        assert_eq!(signaler.sent(), vec!["SIGSTOP", "SIGCONT"]);

        manager.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (manager, _) = fake_manager(1);
        assert!(matches!(manager.stop_job(9), Err(JobError::NotFound(9))));
        assert!(matches!(manager.continue_job(9), Err(JobError::NotFound(9))));
        assert!(matches!(manager.kill_job(9), Err(JobError::NotFound(9))));
        assert!(manager.get_job(9).is_none());
        assert!(matches!(
            manager.wait_for_job(9, Duration::from_millis(10)).await,
            Err(JobError::NotFound(9))
        ));
    }

    #[tokio::test]
    async fn test_capacity_counts_only_active_jobs() {
        let (manager, _) = fake_manager(1);
        let first = manager.start_job("sleep 0.3", "/bin/sh").unwrap();
        assert!(matches!(
            manager.start_job("true", "/bin/sh"),
            Err(JobError::CapacityExceeded { max: 1 })
        ));
        manager
            .wait_for_job(first.id(), Duration::from_secs(5))
            .await
            .unwrap();
        // A finished job frees its slot even before cleanup.
        let second = manager.start_job("true", "/bin/sh").unwrap();
        assert_eq!(second.id(), first.id() + 1);
    }

    #[tokio::test]
    async fn test_launch_failure_rolls_back() {
        let (manager, _) = fake_manager(1);
        let err = manager
            .start_job("true", "/nonexistent/cbwsh-shell")
            .unwrap_err();
        assert!(matches!(err, JobError::LaunchFailed { .. }));
        assert!(manager.list_jobs().is_empty());
        assert_eq!(manager.active_count(), 0);

        // The slot is free again; the failed id is not reused.
        let job = manager.start_job("true", "/bin/sh").unwrap();
        assert_eq!(job.id(), 2);
    }

    #[tokio::test]
    async fn test_kill_falls_back_when_group_signal_fails() {
        let signaler = Arc::new(RecordingSignaler::failing());
        let manager = JobManager::with_signaler(config(2), signaler.clone());
        let job = manager.start_job("sleep 10", "/bin/sh").unwrap();

        manager.kill_job(job.id()).unwrap();
        manager
            .wait_for_job(job.id(), Duration::from_secs(5))
            .await
            .unwrap();
        let sent = signaler.sent();
        assert_eq!(sent.first(), Some(&"SIGKILL"));
        assert!(sent.iter().all(|s| *s == "SIGKILL"));
        assert_ne!(job.status(), JobStatus::Running);
        assert!(job.has_exited());
    }

    #[tokio::test]
    async fn test_kill_finished_job_is_noop() {
        let (manager, signaler) = fake_manager(2);
        let job = manager.start_job("true", "/bin/sh").unwrap();
        manager
            .wait_for_job(job.id(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(job.status(), JobStatus::Completed);

        manager.kill_job(job.id()).unwrap();
        assert!(signaler.sent().is_empty());
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_stop_on_finished_job_is_invalid() {
        let (manager, _) = fake_manager(2);
        let job = manager.start_job("exit 3", "/bin/sh").unwrap();
        manager
            .wait_for_job(job.id(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(
            manager.stop_job(job.id()),
            Err(JobError::InvalidState {
                actual: JobStatus::Failed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_signal_failure_leaves_state() {
        let signaler = Arc::new(RecordingSignaler::failing());
        let manager = JobManager::with_signaler(config(2), signaler);
        let job = manager.start_job("sleep 5", "/bin/sh").unwrap();
        assert!(manager.stop_job(job.id()).is_err());
        assert_eq!(job.status(), JobStatus::Running);
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_and_active() {
        let (manager, _) = fake_manager(4);
        let running = manager.start_job("sleep 5", "/bin/sh").unwrap();
        let done = manager.start_job("true", "/bin/sh").unwrap();
        manager
            .wait_for_job(done.id(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(manager.cleanup_completed(Duration::from_secs(3600)), 0);
        assert_eq!(manager.cleanup_completed(Duration::ZERO), 1);
        let ids: Vec<_> = manager.list_jobs().iter().map(|j| j.id()).collect();
        assert_eq!(ids, vec![running.id()]);
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let (manager, _) = fake_manager(2);
        let mut rx = manager.subscribe();
        let job = manager.start_job("true", "/bin/sh").unwrap();

        let started = rx.recv().await.unwrap();
        assert!(matches!(started, JobEvent::Started(_)));
        assert_eq!(started.snapshot().job_id, job.id());

        let finished = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout waiting for finish event")
            .unwrap();
        match finished {
            JobEvent::Finished(snap) => {
                assert_eq!(snap.status, JobStatus::Completed);
                assert_eq!(snap.exit_code, Some(ExitOutcome::Completed.exit_code()));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_parent_token_cancels_jobs() {
        let parent = CancellationToken::new();
        let signaler = Arc::new(RecordingSignaler::default());
        let manager = JobManager::with_cancellation(config(2), signaler.clone(), parent.clone());
        let job = manager.start_job("sleep 10", "/bin/sh").unwrap();
        let pid = job.pid().unwrap();
        parent.cancel();
        manager
            .wait_for_job(job.id(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!job.is_active());
        // The whole group is killed, not just the leader.
        assert_eq!(*signaler.sent.lock().unwrap(), vec![("SIGKILL", pid)]);
    }

    #[tokio::test]
    async fn test_cleanup_task_sweeps_finished_jobs() {
        let (manager, _) = fake_manager(2);
        let manager = Arc::new(manager);
        let job = manager.start_job("true", "/bin/sh").unwrap();
        manager
            .wait_for_job(job.id(), Duration::from_secs(5))
            .await
            .unwrap();

        let handle = manager.spawn_cleanup_task(Duration::from_millis(10), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(manager.list_jobs().is_empty());

        manager.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cleanup task should stop on shutdown")
            .unwrap();
    }

    #[test]
    fn test_job_manager_default() {
        let manager = JobManager::default();
        assert_eq!(manager.max_jobs(), crate::config::DEFAULT_MAX_JOBS);
        assert!(manager.list_active_jobs().is_empty());
    }
}
