//! In-memory supervision of daemon processes.
//!
//! [`ProcessMonitor`] is the only component that creates or signals daemons.
//! It owns the live `session_id → SpawnedDaemon` map and writes every change
//! through to the [`DaemonRegistry`], so the file always describes at least
//! every daemon the monitor knows about.
//!
//! Spawning and re-attaching are deliberately separate paths: `spawn_daemon`
//! always creates a process and a fresh nonce, while `attach_daemon` only
//! rebuilds tracking state for a process that already exists.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use conductor_protocol::{AgentType, DaemonConfig};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, SupervisorError};
use crate::health::{self, StopSignal};
use crate::launcher::DaemonLauncher;
use crate::registry::{DaemonRecord, DaemonRegistry};

/// A daemon the monitor is currently supervising.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnedDaemon {
    pub session_id: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub config: DaemonConfig,
}

impl SpawnedDaemon {
    pub fn to_record(&self) -> DaemonRecord {
        DaemonRecord {
            session_id: self.session_id.clone(),
            pid: self.pid,
            daemon_nonce: self.config.daemon_nonce.clone(),
            started_at: self.started_at,
            config: self.config.clone(),
        }
    }
}

impl From<&DaemonRecord> for SpawnedDaemon {
    fn from(record: &DaemonRecord) -> Self {
        Self {
            session_id: record.session_id.clone(),
            pid: record.pid,
            started_at: record.started_at,
            config: record.config.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStats {
    pub total: usize,
    pub running: usize,
    pub dead: usize,
    pub by_agent_type: BTreeMap<AgentType, usize>,
}

pub struct ProcessMonitor {
    daemons: HashMap<String, SpawnedDaemon>,
    registry: DaemonRegistry,
    launcher: Box<dyn DaemonLauncher>,
    default_stream_url: Option<String>,
}

impl ProcessMonitor {
    pub fn new(registry: DaemonRegistry, launcher: Box<dyn DaemonLauncher>) -> Self {
        Self {
            daemons: HashMap::new(),
            registry,
            launcher,
            default_stream_url: None,
        }
    }

    /// Stream url stamped onto configs that do not name one.
    pub fn with_default_stream_url(mut self, url: impl Into<String>) -> Self {
        self.default_stream_url = Some(url.into());
        self
    }

    pub fn registry(&self) -> &DaemonRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut DaemonRegistry {
        &mut self.registry
    }

    /// Launches a detached daemon and records it before returning.
    ///
    /// A missing nonce is generated here. Nothing is registered if the process
    /// cannot be created. If the registry write fails after the process exists,
    /// the new process is terminated and the write error is returned.
    pub fn spawn_daemon(&mut self, mut config: DaemonConfig) -> Result<SpawnedDaemon> {
        if config.daemon_nonce.trim().is_empty() {
            config.daemon_nonce = generate_nonce();
        }
        if config.stream_url.is_none() {
            config.stream_url = self.default_stream_url.clone();
        }
        config.validate().map_err(SupervisorError::InvalidConfig)?;

        let pid = self
            .launcher
            .launch(&config)
            .map_err(|source| SupervisorError::Spawn {
                session_id: config.session_id.clone(),
                source,
            })?;

        let daemon = SpawnedDaemon {
            session_id: config.session_id.clone(),
            pid,
            started_at: Utc::now(),
            config,
        };

        if let Err(err) = self.registry.register(daemon.to_record()) {
            warn!(
                session_id = %daemon.session_id,
                pid,
                error = %err,
                "Registry write failed after spawn; terminating unrecorded daemon"
            );
            health::send_signal(pid, StopSignal::Term);
            return Err(err);
        }

        if let Some(previous) = self.daemons.insert(daemon.session_id.clone(), daemon.clone()) {
            warn!(
                session_id = %daemon.session_id,
                previous_pid = previous.pid,
                pid,
                "Replaced tracked daemon for session"
            );
        }

        info!(
            session_id = %daemon.session_id,
            pid,
            agent_type = %daemon.config.agent_type,
            "Daemon spawned"
        );
        Ok(daemon)
    }

    pub fn is_process_running(&self, pid: u32) -> bool {
        health::is_process_running(pid)
    }

    /// Signals a tracked daemon and stops tracking it.
    ///
    /// Returns `Ok(false)` when the session is not tracked. Once a kill is
    /// requested the session is dropped from memory and from the registry
    /// whether or not the signal could be delivered. A failed registry write is
    /// returned to the caller after the in-memory entry is already gone; the
    /// stale record is pruned on the next boot because its pid will be dead or
    /// its identity will no longer match.
    pub fn kill_daemon(&mut self, session_id: &str, signal: StopSignal) -> Result<bool> {
        let Some(daemon) = self.daemons.remove(session_id) else {
            debug!(session_id = %session_id, "Kill requested for untracked session");
            return Ok(false);
        };

        if health::is_process_running(daemon.pid) {
            if health::send_signal(daemon.pid, signal) {
                info!(session_id = %session_id, pid = daemon.pid, signal = %signal, "Daemon signalled");
            } else {
                warn!(session_id = %session_id, pid = daemon.pid, signal = %signal, "Failed to signal daemon");
            }
        } else {
            debug!(session_id = %session_id, pid = daemon.pid, "Daemon already exited");
        }

        self.registry.remove(session_id)?;
        Ok(true)
    }

    /// Drops every tracked daemon whose pid no longer passes the liveness check.
    ///
    /// All dead sessions leave memory even if a registry write fails; the first
    /// write error is returned after every removal has been attempted.
    pub fn prune_dead_daemons(&mut self) -> Result<Vec<String>> {
        let mut dead: Vec<String> = self
            .daemons
            .values()
            .filter(|daemon| !health::is_process_running(daemon.pid))
            .map(|daemon| daemon.session_id.clone())
            .collect();
        dead.sort();

        for session_id in &dead {
            self.daemons.remove(session_id);
        }

        let mut first_error = None;
        for session_id in &dead {
            match self.registry.remove(session_id) {
                Ok(_) => debug!(session_id = %session_id, "Pruned dead daemon"),
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "Failed to unregister dead daemon");
                    first_error.get_or_insert(err);
                }
            }
        }

        if !dead.is_empty() {
            info!(pruned = dead.len(), "Pruned dead daemons");
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(dead),
        }
    }

    /// Resumes tracking of an already-running daemon. Never spawns.
    pub fn attach_daemon(&mut self, record: &DaemonRecord) {
        debug!(session_id = %record.session_id, pid = record.pid, "Attaching daemon");
        self.daemons
            .insert(record.session_id.clone(), SpawnedDaemon::from(record));
    }

    /// Stops tracking every daemon without signalling or touching the
    /// registry. Returns how many were dropped.
    pub(crate) fn detach_all(&mut self) -> usize {
        let count = self.daemons.len();
        self.daemons.clear();
        count
    }

    pub fn get_daemon(&self, session_id: &str) -> Option<&SpawnedDaemon> {
        self.daemons.get(session_id)
    }

    /// Tracked daemons, oldest first.
    pub fn list_daemons(&self) -> Vec<SpawnedDaemon> {
        let mut daemons: Vec<SpawnedDaemon> = self.daemons.values().cloned().collect();
        daemons.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        daemons
    }

    /// Counts checked at call time; nothing is cached.
    pub fn get_stats(&self) -> DaemonStats {
        let mut stats = DaemonStats::default();
        for daemon in self.daemons.values() {
            stats.total += 1;
            if health::is_process_running(daemon.pid) {
                stats.running += 1;
            } else {
                stats.dead += 1;
            }
            *stats
                .by_agent_type
                .entry(daemon.config.agent_type)
                .or_insert(0) += 1;
        }
        stats
    }

    /// Best-effort termination of every tracked daemon. Returns how many
    /// sessions were dropped.
    pub fn kill_all_daemons(&mut self, signal: StopSignal) -> usize {
        let mut session_ids: Vec<String> = self.daemons.keys().cloned().collect();
        session_ids.sort();

        let mut killed = 0;
        for session_id in session_ids {
            match self.kill_daemon(&session_id, signal) {
                Ok(true) => killed += 1,
                Ok(false) => {}
                Err(err) => {
                    // The in-memory entry is gone even when the write failed.
                    killed += 1;
                    warn!(session_id = %session_id, error = %err, "Failed to unregister daemon during shutdown");
                }
            }
        }
        killed
    }
}

/// 128 random bits, hex encoded.
pub fn generate_nonce() -> String {
    format!("{:032x}", rand::random::<u128>())
}
