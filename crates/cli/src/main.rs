// crates/cli/src/main.rs
//! `cbwsh-jobs` binary.
//!
//! Reads commands line by line from stdin and routes job builtins
//! (`jobs`, `bg`, `stop`, `cont`, `kill`, `wait`, `cleanup`) to a shared
//! [`JobManager`]. Finished jobs are announced on stderr the way an
//! interactive shell reports them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cbwsh_jobs::builtin::{self, Builtin};
use cbwsh_jobs::{JobEvent, JobManager, JobSnapshot, JobStatus, JobsConfig, UnixSignaler};
use cbwsh_observability::{init_tracing, LoggingConfig};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

/// How long `exit` waits for killed jobs to be reaped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(name = "cbwsh-jobs", version, about = "Background job control for cbwsh")]
struct Cli {
    /// TOML file with job settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum number of running or stopped jobs.
    #[arg(long)]
    max_jobs: Option<usize>,

    /// Shell used to run commands (`<shell> -c <command>`).
    #[arg(long)]
    shell: Option<String>,

    /// Let jobs write to this terminal instead of /dev/null.
    #[arg(long)]
    inherit_output: bool,

    /// Run lines that are not builtins as background jobs.
    #[arg(long)]
    auto_bg: bool,

    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Also write rolling log files to this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    fn jobs_config(&self) -> Result<JobsConfig> {
        let config = match &self.config {
            Some(path) => JobsConfig::load(path)?,
            None => JobsConfig::default(),
        };
        let mut config = config.apply_env_overrides()?;
        if let Some(max_jobs) = self.max_jobs {
            config.max_jobs = max_jobs;
        }
        if let Some(shell) = &self.shell {
            config.shell = shell.clone();
        }
        if self.inherit_output {
            config.inherit_output = true;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Shell-style notice for a finished job.
fn finish_notice(snapshot: &JobSnapshot) -> String {
    let state = match (snapshot.status, snapshot.exit_code) {
        (JobStatus::Completed, _) => "Done".to_string(),
        (JobStatus::Failed, Some(code)) => format!("Exit {code}"),
        (JobStatus::Failed, None) => "Exit".to_string(),
        (JobStatus::Stopped, _) | (JobStatus::Running, _) => "Killed".to_string(),
    };
    format!("[{}] {} {}", snapshot.job_id, state, snapshot.command)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_tracing(&LoggingConfig {
        level: cli.log_level.clone(),
        file_dir: cli.log_dir.clone(),
        ..LoggingConfig::default()
    })?;

    let config = cli.jobs_config().context("invalid job configuration")?;
    tracing::info!(max_jobs = config.max_jobs, shell = %config.shell, "Starting job control");

    let shutdown = CancellationToken::new();
    let manager = Arc::new(JobManager::with_cancellation(
        config.clone(),
        Arc::new(UnixSignaler),
        shutdown.child_token(),
    ));
    let _cleanup = manager.spawn_cleanup_task(config.cleanup_interval(), config.cleanup_max_age());

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let JobEvent::Finished(snapshot) = event {
                eprintln!("{}", finish_notice(&snapshot));
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                shutdown.cancel();
                break;
            }
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        let output = match builtin::dispatch(&manager, line).await {
            Some(output) => output,
            None if cli.auto_bg => {
                Builtin::Background(line.to_string()).run(&manager).await
            }
            None => {
                eprintln!("unknown command: {line}");
                continue;
            }
        };
        for out in &output.lines {
            if output.is_error {
                eprintln!("{out}");
            } else {
                println!("{out}");
            }
        }
    }

    let stragglers = manager.shutdown_and_wait(SHUTDOWN_GRACE).await;
    if !stragglers.is_empty() {
        eprintln!("jobs still running at exit: {stragglers:?}");
    }
    Ok(())
}
