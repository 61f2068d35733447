// crates/jobs/src/builtin.rs
//! Job-control shell builtins.
//!
//! Turns a user-entered line into a [`Builtin`] and runs it against a
//! [`JobManager`], producing plain-text lines for the caller to print.
//! Lines that are not job builtins yield `None` so the caller can hand them
//! to its foreground executor.

use std::time::Duration;

use crate::manager::JobManager;
use crate::types::JobId;

pub const DEFAULT_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Builtin {
    /// `jobs`
    Jobs,
    /// `bg <command...>`
    Background(String),
    /// `stop %<id>`
    Stop(JobId),
    /// `cont %<id>` / `continue %<id>`
    Continue(JobId),
    /// `kill %<id>`
    Kill(JobId),
    /// `wait %<id> [seconds]`
    Wait(JobId, Duration),
    /// `cleanup [seconds]`
    Cleanup(Duration),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuiltinOutput {
    pub lines: Vec<String>,
    pub is_error: bool,
}

impl BuiltinOutput {
    fn ok(lines: Vec<String>) -> Self {
        Self {
            lines,
            is_error: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            lines: vec![message.into()],
            is_error: true,
        }
    }
}

impl Builtin {
    /// `None` if the line is not a job builtin; `Some(Err(usage))` if it is
    /// one but the arguments are malformed.
    pub fn parse(line: &str) -> Option<Result<Self, String>> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };
        let args: Vec<&str> = rest.split_whitespace().collect();

        let parsed = match name {
            "jobs" => Ok(Builtin::Jobs),
            "bg" if rest.is_empty() => Err("usage: bg <command>".to_string()),
            "bg" => Ok(Builtin::Background(rest.to_string())),
            "stop" => single_job(&args, "stop").map(Builtin::Stop),
            "cont" | "continue" => single_job(&args, name).map(Builtin::Continue),
            "kill" => single_job(&args, "kill").map(Builtin::Kill),
            "wait" => match args.as_slice() {
                [job] => parse_job_ref(job).map(|id| Builtin::Wait(id, DEFAULT_WAIT)),
                [job, secs] => parse_job_ref(job)
                    .and_then(|id| parse_secs(secs).map(|t| Builtin::Wait(id, t))),
                _ => Err("usage: wait %<job> [seconds]".to_string()),
            },
            "cleanup" => match args.as_slice() {
                [] => Ok(Builtin::Cleanup(Duration::ZERO)),
                [secs] => parse_secs(secs).map(Builtin::Cleanup),
                _ => Err("usage: cleanup [seconds]".to_string()),
            },
            _ => return None,
        };
        Some(parsed)
    }

    /// Run against `manager`, rendering failures as error lines.
    pub async fn run(self, manager: &JobManager) -> BuiltinOutput {
        match self {
            Builtin::Jobs => {
                let jobs = manager.list_jobs();
                if jobs.is_empty() {
                    BuiltinOutput::ok(vec!["no jobs".to_string()])
                } else {
                    BuiltinOutput::ok(jobs.iter().map(|j| j.describe()).collect())
                }
            }
            Builtin::Background(command) => match manager.start_job_default_shell(&command) {
                Ok(job) => BuiltinOutput::ok(vec![format!(
                    "[{}] {}",
                    job.id(),
                    job.pid().unwrap_or_default()
                )]),
                Err(e) => BuiltinOutput::error(e.to_string()),
            },
            Builtin::Stop(id) => describe_after(manager, id, manager.stop_job(id)),
            Builtin::Continue(id) => describe_after(manager, id, manager.continue_job(id)),
            Builtin::Kill(id) => match manager.kill_job(id) {
                Ok(()) => BuiltinOutput::ok(vec![format!("[{id}] kill signal sent")]),
                Err(e) => BuiltinOutput::error(e.to_string()),
            },
            Builtin::Wait(id, timeout) => {
                let waited = manager.wait_for_job(id, timeout).await;
                describe_after(manager, id, waited)
            }
            Builtin::Cleanup(max_age) => {
                let removed = manager.cleanup_completed(max_age);
                BuiltinOutput::ok(vec![format!("removed {removed} finished job(s)")])
            }
        }
    }
}

/// Parse and run `line`. `None` if it is not a job builtin.
pub async fn dispatch(manager: &JobManager, line: &str) -> Option<BuiltinOutput> {
    match Builtin::parse(line)? {
        Ok(builtin) => Some(builtin.run(manager).await),
        Err(usage) => Some(BuiltinOutput::error(usage)),
    }
}

fn describe_after(
    manager: &JobManager,
    id: JobId,
    result: crate::error::Result<()>,
) -> BuiltinOutput {
    match result.map(|()| manager.get_job(id)) {
        Ok(Some(job)) => BuiltinOutput::ok(vec![job.describe()]),
        Ok(None) => BuiltinOutput::ok(Vec::new()),
        Err(e) => BuiltinOutput::error(e.to_string()),
    }
}

fn single_job(args: &[&str], name: &str) -> Result<JobId, String> {
    match args {
        [job] => parse_job_ref(job),
        _ => Err(format!("usage: {name} %<job>")),
    }
}

/// Accepts `%3` or `3`.
fn parse_job_ref(raw: &str) -> Result<JobId, String> {
    let digits = raw.strip_prefix('%').unwrap_or(raw);
    match digits.parse::<JobId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(format!("invalid job reference: {raw}")),
    }
}

fn parse_secs(raw: &str) -> Result<Duration, String> {
    raw.parse::<f64>()
        .ok()
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .ok_or_else(|| format!("invalid number of seconds: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobsConfig;
    use pretty_assertions::assert_eq;

    fn manager(max_jobs: usize) -> JobManager {
        JobManager::new(JobsConfig {
            max_jobs,
            shell: "/bin/sh".to_string(),
            ..JobsConfig::default()
        })
    }

    #[test]
    fn test_parse_builtins() {
        assert_eq!(Builtin::parse("jobs"), Some(Ok(Builtin::Jobs)));
        assert_eq!(
            Builtin::parse("  bg sleep 1 | cat  "),
            Some(Ok(Builtin::Background("sleep 1 | cat".to_string())))
        );
        assert_eq!(Builtin::parse("stop %2"), Some(Ok(Builtin::Stop(2))));
        assert_eq!(Builtin::parse("continue 2"), Some(Ok(Builtin::Continue(2))));
        assert_eq!(Builtin::parse("kill %10"), Some(Ok(Builtin::Kill(10))));
        assert_eq!(
            Builtin::parse("wait %1 0.5"),
            Some(Ok(Builtin::Wait(1, Duration::from_millis(500))))
        );
        assert_eq!(Builtin::parse("wait %1"), Some(Ok(Builtin::Wait(1, DEFAULT_WAIT))));
        assert_eq!(Builtin::parse("cleanup"), Some(Ok(Builtin::Cleanup(Duration::ZERO))));
    }

    #[test]
    fn test_parse_rejects_bad_arguments() {
        assert_eq!(
            Builtin::parse("stop"),
            Some(Err("usage: stop %<job>".to_string()))
        );
        assert_eq!(
            Builtin::parse("kill %abc"),
            Some(Err("invalid job reference: %abc".to_string()))
        );
        assert_eq!(Builtin::parse("bg"), Some(Err("usage: bg <command>".to_string())));
        assert!(matches!(Builtin::parse("wait %1 -3"), Some(Err(_))));
        assert!(matches!(Builtin::parse("kill %0"), Some(Err(_))));
    }

    #[test]
    fn test_parse_rejects_out_of_range_seconds() {
        assert_eq!(
            Builtin::parse("wait %1 1e30"),
            Some(Err("invalid number of seconds: 1e30".to_string()))
        );
        assert_eq!(
            Builtin::parse("cleanup 1e20"),
            Some(Err("invalid number of seconds: 1e20".to_string()))
        );
        assert!(matches!(Builtin::parse("cleanup inf"), Some(Err(_))));
        assert!(matches!(Builtin::parse("wait %1 NaN"), Some(Err(_))));
    }

    #[test]
    fn test_non_builtins_fall_through() {
        assert_eq!(Builtin::parse("ls -la"), None);
        assert_eq!(Builtin::parse(""), None);
        assert_eq!(Builtin::parse("jobsx"), None);
    }

    #[tokio::test]
    async fn test_dispatch_lifecycle() {
        let manager = manager(2);
        let out = dispatch(&manager, "jobs").await.unwrap();
        assert_eq!(out.lines, vec!["no jobs".to_string()]);

        let out = dispatch(&manager, "bg sleep 5").await.unwrap();
        assert!(!out.is_error);
        assert!(out.lines[0].starts_with("[1] "));

        let out = dispatch(&manager, "stop %1").await.unwrap();
        assert!(out.lines[0].starts_with("[1] Stopped sleep 5 (PID: "));

        let out = dispatch(&manager, "cont %1").await.unwrap();
        assert!(out.lines[0].starts_with("[1] Running sleep 5"));

        let out = dispatch(&manager, "kill %1").await.unwrap();
        assert_eq!(out.lines, vec!["[1] kill signal sent".to_string()]);

        let out = dispatch(&manager, "wait %1 5").await.unwrap();
        assert!(!out.is_error, "{:?}", out.lines);
        assert!(!out.lines[0].contains("Running"));

        let out = dispatch(&manager, "cleanup").await.unwrap();
        assert_eq!(out.lines, vec!["removed 1 finished job(s)".to_string()]);
    }

    #[tokio::test]
    async fn test_dispatch_reports_errors_as_lines() {
        let manager = manager(1);
        let out = dispatch(&manager, "kill %3").await.unwrap();
        assert!(out.is_error);
        assert_eq!(out.lines, vec!["job not found: 3".to_string()]);

        dispatch(&manager, "bg sleep 5").await.unwrap();
        let out = dispatch(&manager, "bg sleep 5").await.unwrap();
        assert!(out.is_error);
        assert_eq!(out.lines, vec!["maximum number of jobs reached (1)".to_string()]);

        let out = dispatch(&manager, "wait %1 0.05").await.unwrap();
        assert!(out.is_error);
        assert!(out.lines[0].starts_with("timed out"));

        manager.shutdown();
    }
}
