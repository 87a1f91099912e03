//! Storage path management.
//!
//! Every file the supervisor touches is named here. Production code roots the
//! tree at `~/.conductor`; tests use [`StoragePaths::with_root`] with a temp dir.

use std::path::{Path, PathBuf};

use crate::error::{Result, SupervisorError};

#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    /// `~/.conductor`.
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(SupervisorError::HomeNotFound)?;
        Ok(Self::with_root(home.join(".conductor")))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Durable registry of spawned daemons.
    pub fn registry_file(&self) -> PathBuf {
        self.root.join("daemons.json")
    }

    /// Optional TOML configuration.
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Rolling log files written by detached daemons.
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Default location of the local session streams.
    pub fn streams_dir(&self) -> PathBuf {
        self.root.join("streams")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_the_root() {
        let paths = StoragePaths::with_root(PathBuf::from("/tmp/conductor-test"));
        assert_eq!(
            paths.registry_file(),
            PathBuf::from("/tmp/conductor-test/daemons.json")
        );
        assert_eq!(paths.logs_dir(), PathBuf::from("/tmp/conductor-test/logs"));
        assert_eq!(
            paths.streams_dir(),
            PathBuf::from("/tmp/conductor-test/streams")
        );
    }
}
