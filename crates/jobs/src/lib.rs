// crates/jobs/src/lib.rs
//! Background job control for cbwsh.
//!
//! Provides:
//! - `JobManager` — launches shell commands as process-group leaders and
//!   exposes stop/continue/kill/wait/list over them
//! - `Job` — observe handle for one launched command
//! - `ProcessSignaler` — process-group signaling seam (`UnixSignaler` in production)
//! - `builtin` — the `jobs`/`bg`/`stop`/`cont`/`kill`/`wait` shell builtins

pub mod builtin;
pub mod config;
pub mod error;
pub mod job;
pub mod manager;
pub mod monitor;
pub mod signal;
pub mod types;

pub use config::JobsConfig;
pub use error::{ConfigError, JobError, SignalError};
pub use job::Job;
pub use manager::JobManager;
pub use signal::{interrupt_process, kill_process, terminate_process, ProcessSignaler, UnixSignaler};
pub use types::{ExitOutcome, JobEvent, JobId, JobSnapshot, JobStatus};
