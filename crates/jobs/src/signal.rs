// crates/jobs/src/signal.rs
//! Process-group signaling.
//!
//! Jobs are launched as leaders of their own process group, so the leader's
//! pid is also the group id and every control signal goes to the whole group
//! via `killpg`. Pipelines and any grandchildren a job spawned are stopped,
//! resumed or killed together with it, even after the leader was reaped.
//!
//! A target that has already exited (`ESRCH`) is not an error: termination
//! races between a control command and the job finishing on its own are
//! expected.

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, error};

use crate::error::SignalError;

/// Delivers job-control signals to the process group led by a job's pid.
///
/// Implemented by [`UnixSignaler`] in production; tests substitute a
/// recording fake so the state machine can be driven without real signals.
pub trait ProcessSignaler: Send + Sync + 'static {
    /// SIGSTOP to process group `pid`.
    fn suspend(&self, pid: u32) -> Result<(), SignalError>;

    /// SIGCONT to process group `pid`.
    fn resume(&self, pid: u32) -> Result<(), SignalError>;

    /// SIGKILL to process group `pid`.
    fn terminate(&self, pid: u32) -> Result<(), SignalError>;
}

/// [`ProcessSignaler`] backed by `killpg(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixSignaler;

impl ProcessSignaler for UnixSignaler {
    fn suspend(&self, pid: u32) -> Result<(), SignalError> {
        signal_group(pid, Signal::SIGSTOP)
    }

    fn resume(&self, pid: u32) -> Result<(), SignalError> {
        signal_group(pid, Signal::SIGCONT)
    }

    fn terminate(&self, pid: u32) -> Result<(), SignalError> {
        signal_group(pid, Signal::SIGKILL)
    }
}

/// SIGKILL a single process.
pub fn kill_process(pid: u32) -> Result<(), SignalError> {
    signal_process(pid, Signal::SIGKILL)
}

/// SIGTERM a single process, letting it shut down gracefully.
pub fn terminate_process(pid: u32) -> Result<(), SignalError> {
    signal_process(pid, Signal::SIGTERM)
}

/// SIGINT a single process, as Ctrl-C would for a foreground command.
pub fn interrupt_process(pid: u32) -> Result<(), SignalError> {
    signal_process(pid, Signal::SIGINT)
}

fn signal_group(pgid: u32, signal: Signal) -> Result<(), SignalError> {
    debug!(pgid, signal = signal.as_str(), "Signaling process group");
    match killpg(to_pid(pgid), signal) {
        Ok(()) => Ok(()),
        // EPERM shows up when only zombies are left in the group.
        Err(Errno::ESRCH) | Err(Errno::EPERM) => {
            debug!(pgid, signal = signal.as_str(), "Process group already exited");
            Ok(())
        }
        Err(errno) => {
            error!(pgid, signal = signal.as_str(), %errno, "Failed to signal process group");
            Err(SignalError {
                signal: signal.as_str(),
                target: "process group",
                pid: pgid,
                errno,
            })
        }
    }
}

fn signal_process(pid: u32, signal: Signal) -> Result<(), SignalError> {
    debug!(pid, signal = signal.as_str(), "Signaling process");
    match kill(to_pid(pid), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => {
            error!(pid, signal = signal.as_str(), %errno, "Failed to signal process");
            Err(SignalError {
                signal: signal.as_str(),
                target: "process",
                pid,
                errno,
            })
        }
    }
}

fn to_pid(pid: u32) -> Pid {
    Pid::from_raw(pid as i32)
}
