//! Process liveness and signal delivery.
//!
//! Liveness is checked with signal 0. Any failure, including `EPERM` for a
//! process owned by another user, reads as dead: a record we cannot monitor is
//! pruned rather than kept as a ghost.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Returns true when `pid` names a process we can signal.
pub fn is_process_running(pid: u32) -> bool {
    let Some(pid) = signalable_pid(pid) else {
        return false;
    };
    #[cfg(unix)]
    {
        // SAFETY: kill with signal 0 only checks for existence and permission.
        unsafe { libc::kill(pid, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Termination signals the supervisor sends to daemons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopSignal {
    #[default]
    #[serde(rename = "SIGTERM")]
    Term,
    #[serde(rename = "SIGKILL")]
    Kill,
    #[serde(rename = "SIGINT")]
    Int,
    #[serde(rename = "SIGHUP")]
    Hup,
}

impl StopSignal {
    pub fn name(&self) -> &'static str {
        match self {
            StopSignal::Term => "SIGTERM",
            StopSignal::Kill => "SIGKILL",
            StopSignal::Int => "SIGINT",
            StopSignal::Hup => "SIGHUP",
        }
    }

    #[cfg(unix)]
    fn as_raw(&self) -> libc::c_int {
        match self {
            StopSignal::Term => libc::SIGTERM,
            StopSignal::Kill => libc::SIGKILL,
            StopSignal::Int => libc::SIGINT,
            StopSignal::Hup => libc::SIGHUP,
        }
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StopSignal {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let upper = value.trim().to_ascii_uppercase();
        match upper.strip_prefix("SIG").unwrap_or(&upper) {
            "TERM" | "15" => Ok(StopSignal::Term),
            "KILL" | "9" => Ok(StopSignal::Kill),
            "INT" | "2" => Ok(StopSignal::Int),
            "HUP" | "1" => Ok(StopSignal::Hup),
            _ => Err(format!("unsupported signal {:?}", value)),
        }
    }
}

/// Signals the daemon's process group, falling back to the pid alone.
///
/// Daemons are launched as group leaders, so the group signal also reaches the
/// agent CLI they run. Returns true when either delivery succeeded.
pub fn send_signal(pid: u32, signal: StopSignal) -> bool {
    let Some(pid) = signalable_pid(pid) else {
        return false;
    };
    #[cfg(unix)]
    {
        let raw = signal.as_raw();
        // SAFETY: kill takes plain integers; pid > 1, so -pid names a single
        // process group, never every process.
        unsafe { libc::kill(-pid, raw) == 0 || libc::kill(pid, raw) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
        false
    }
}

/// Pids 0 and anything that overflows into a negative `pid_t` address
/// process groups (or every process), never a single daemon.
fn signalable_pid(pid: u32) -> Option<i32> {
    match i32::try_from(pid) {
        Ok(pid) if pid > 1 => Some(pid),
        _ => None,
    }
}
