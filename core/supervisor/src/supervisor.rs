//! Composition root.
//!
//! A [`Supervisor`] is built once at startup and passed by reference to
//! whatever handles requests. It owns the monitor (and through it the
//! registry), the launcher and the stream connector; nothing here is global.

use conductor_protocol::{DaemonConfig, EventIter};
use serde::Serialize;
use tracing::info;

use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::health::StopSignal;
use crate::launcher::{DaemonLauncher, DetachedLauncher};
use crate::monitor::{DaemonStats, ProcessMonitor, SpawnedDaemon};
use crate::registry::DaemonRegistry;
use crate::rehydrate::{rehydrate_daemons_on_boot, RehydrationReport};
use crate::streams::{FileStreamConnector, StreamConnector};

/// What a spawn request returns to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnReceipt {
    pub session_id: String,
    pub pid: u32,
}

pub struct Supervisor {
    config: SupervisorConfig,
    monitor: ProcessMonitor,
    connector: Box<dyn StreamConnector>,
}

impl Supervisor {
    /// Production wiring: detached agent-daemon processes and local streams.
    pub fn new(config: SupervisorConfig) -> Self {
        let launcher =
            DetachedLauncher::new(&config.daemon_bin).with_log_dir(config.paths.logs_dir());
        Self::with_parts(config, Box::new(launcher), Box::new(FileStreamConnector))
    }

    pub fn with_parts(
        config: SupervisorConfig,
        launcher: Box<dyn DaemonLauncher>,
        connector: Box<dyn StreamConnector>,
    ) -> Self {
        let registry = DaemonRegistry::load(config.paths.registry_file());
        let monitor = ProcessMonitor::new(registry, launcher)
            .with_default_stream_url(config.stream_url.clone());
        Self {
            config,
            monitor,
            connector,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn monitor(&self) -> &ProcessMonitor {
        &self.monitor
    }

    pub fn monitor_mut(&mut self) -> &mut ProcessMonitor {
        &mut self.monitor
    }

    /// Boot hook. Run once before serving anything that reads daemon state.
    ///
    /// With durable streams disabled this does nothing: supervision starts from
    /// zero and earlier daemons are never resumed.
    pub fn boot(&mut self) -> Result<RehydrationReport> {
        if !self.config.durable_streams {
            info!("Durable streams disabled; skipping daemon rehydration");
            return Ok(RehydrationReport::default());
        }
        rehydrate_daemons_on_boot(
            &mut self.monitor,
            self.connector.as_ref(),
            &self.config.stream_url,
            self.config.attest_grace,
        )
    }

    pub fn spawn(&mut self, config: DaemonConfig) -> Result<SpawnReceipt> {
        let daemon = self.monitor.spawn_daemon(config)?;
        Ok(SpawnReceipt {
            session_id: daemon.session_id,
            pid: daemon.pid,
        })
    }

    pub fn cancel(&mut self, session_id: &str, signal: StopSignal) -> Result<bool> {
        self.monitor.kill_daemon(session_id, signal)
    }

    pub fn list(&self) -> Vec<SpawnedDaemon> {
        self.monitor.list_daemons()
    }

    pub fn stats(&self) -> DaemonStats {
        self.monitor.get_stats()
    }

    pub fn prune(&mut self) -> Result<Vec<String>> {
        self.monitor.prune_dead_daemons()
    }

    pub fn shutdown(&mut self, signal: StopSignal) -> usize {
        self.monitor.kill_all_daemons(signal)
    }

    /// Live tail of a session, read from the stream the session publishes to.
    pub fn subscribe(&self, session_id: &str) -> Result<EventIter> {
        let url = self
            .monitor
            .get_daemon(session_id)
            .and_then(|daemon| daemon.config.stream_url.clone())
            .unwrap_or_else(|| self.config.stream_url.clone());
        let client = self.connector.connect(&url)?;
        Ok(client.subscribe_to_session(session_id)?)
    }
}
