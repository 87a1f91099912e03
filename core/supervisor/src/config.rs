//! Supervisor configuration.
//!
//! Resolution order, lowest to highest: built-in defaults, `<home>/config.toml`,
//! environment variables. A missing config file is not an error; a malformed
//! one is.
//!
//! ```toml
//! stream_url = "file:///var/lib/conductor/streams"
//! daemon_bin = "/usr/local/bin/conductor-agent-daemon"
//! durable_streams = true
//! attest_grace_secs = 10
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs_err as fs;
use serde::Deserialize;
use tracing::warn;

use crate::error::{Result, SupervisorError};
use crate::rehydrate::DEFAULT_ATTEST_GRACE;
use crate::storage::StoragePaths;

pub const HOME_ENV: &str = "CONDUCTOR_HOME";
pub const STREAM_URL_ENV: &str = "CONDUCTOR_STREAM_URL";
pub const DAEMON_BIN_ENV: &str = "CONDUCTOR_DAEMON_BIN";
pub const DURABLE_STREAMS_ENV: &str = "CONDUCTOR_DURABLE_STREAMS";
pub const ATTEST_GRACE_ENV: &str = "CONDUCTOR_ATTEST_GRACE_SECS";

pub const DAEMON_BIN_NAME: &str = "conductor-agent-daemon";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    stream_url: Option<String>,
    daemon_bin: Option<PathBuf>,
    durable_streams: Option<bool>,
    attest_grace_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub paths: StoragePaths,
    /// Default stream for sessions whose config does not name one.
    pub stream_url: String,
    pub daemon_bin: PathBuf,
    /// When false, nothing from a previous run is ever re-attached.
    pub durable_streams: bool,
    /// How long a new daemon may go without a `daemon_started` event before
    /// boot treats its record as stale.
    pub attest_grace: Duration,
}

impl SupervisorConfig {
    /// Defaults rooted at `root`, ignoring files and environment.
    pub fn with_root(root: PathBuf) -> Self {
        let paths = StoragePaths::with_root(root);
        Self {
            stream_url: paths.streams_dir().display().to_string(),
            daemon_bin: default_daemon_bin(),
            durable_streams: true,
            attest_grace: DEFAULT_ATTEST_GRACE,
            paths,
        }
    }

    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        Self::load_with_env(path, |key| env::var(key).ok())
    }

    pub fn load_with_env(
        path: Option<PathBuf>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let paths = match lookup(HOME_ENV).filter(|value| !value.trim().is_empty()) {
            Some(home) => StoragePaths::with_root(PathBuf::from(home)),
            None => StoragePaths::from_home()?,
        };
        let config_path = path.unwrap_or_else(|| paths.config_file());
        let file = read_file_config(&config_path)?;

        let mut config = Self::with_root(paths.root().to_path_buf());
        if let Some(url) = file.stream_url {
            config.stream_url = url;
        }
        if let Some(bin) = file.daemon_bin {
            config.daemon_bin = bin;
        }
        if let Some(enabled) = file.durable_streams {
            config.durable_streams = enabled;
        }
        if let Some(secs) = file.attest_grace_secs {
            config.attest_grace = Duration::from_secs(secs);
        }

        if let Some(url) = lookup(STREAM_URL_ENV).filter(|value| !value.trim().is_empty()) {
            config.stream_url = url;
        }
        if let Some(bin) = lookup(DAEMON_BIN_ENV).filter(|value| !value.trim().is_empty()) {
            config.daemon_bin = PathBuf::from(bin);
        }
        if let Some(raw) = lookup(DURABLE_STREAMS_ENV) {
            match parse_flag(&raw) {
                Some(enabled) => config.durable_streams = enabled,
                None => warn!(
                    variable = DURABLE_STREAMS_ENV,
                    value = %raw,
                    "Ignoring unrecognized boolean"
                ),
            }
        }
        if let Some(raw) = lookup(ATTEST_GRACE_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => config.attest_grace = Duration::from_secs(secs),
                Err(_) => warn!(
                    variable = ATTEST_GRACE_ENV,
                    value = %raw,
                    "Ignoring non-numeric grace period"
                ),
            }
        }

        Ok(config)
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let content = fs::read_to_string(path).map_err(|err| SupervisorError::Config {
        path: path.to_path_buf(),
        details: err.to_string(),
    })?;
    toml::from_str(&content).map_err(|err| SupervisorError::Config {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// The daemon binary installed next to the running executable, else whatever
/// `PATH` resolves.
fn default_daemon_bin() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DAEMON_BIN_NAME)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(DAEMON_BIN_NAME))
}
