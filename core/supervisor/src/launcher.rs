//! Detached process creation.
//!
//! A daemon must outlive the supervisor that started it, so it gets its own
//! process group and no stdio: it talks to the world only through its session
//! stream. The supervisor keeps the child handle on a reaper thread so a daemon
//! that exits while we are still running is collected instead of lingering as
//! a zombie that would still pass the liveness check.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;

use conductor_protocol::DaemonConfig;
use tracing::{debug, warn};

/// Creates the OS process for one daemon and returns its pid.
pub trait DaemonLauncher: Send + Sync {
    fn launch(&self, config: &DaemonConfig) -> io::Result<u32>;
}

/// Launches the `conductor-agent-daemon` binary.
#[derive(Debug, Clone)]
pub struct DetachedLauncher {
    program: PathBuf,
    log_dir: Option<PathBuf>,
}

impl DetachedLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            log_dir: None,
        }
    }

    /// Directory the daemon writes its own rolling log into.
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl DaemonLauncher for DetachedLauncher {
    fn launch(&self, config: &DaemonConfig) -> io::Result<u32> {
        let payload = serde_json::to_string(config)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

        let mut command = Command::new(&self.program);
        command.arg("--config").arg(payload);
        if let Some(log_dir) = &self.log_dir {
            command.arg("--log-dir").arg(log_dir);
        }
        command.current_dir(&config.working_dir);

        spawn_detached(command, &config.session_id)
    }
}

/// Spawns `command` in its own process group with null stdio and hands the
/// child to a reaper thread.
pub fn spawn_detached(mut command: Command, label: &str) -> io::Result<u32> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command.spawn()?;
    let pid = child.id();
    reap_in_background(child, label);
    Ok(pid)
}

fn reap_in_background(mut child: Child, label: &str) {
    let pid = child.id();
    let label = label.to_string();
    let spawned = thread::Builder::new()
        .name(format!("reaper-{}", pid))
        .spawn(move || match child.wait() {
            Ok(status) => debug!(session_id = %label, pid, status = %status, "Daemon exited"),
            Err(err) => warn!(session_id = %label, pid, error = %err, "Failed to reap daemon"),
        });
    if let Err(err) = spawned {
        // Without a reaper the child becomes a zombie only until we exit.
        warn!(pid, error = %err, "Failed to start reaper thread");
    }
}
