use std::io;
use std::path::PathBuf;

use conductor_protocol::StreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Invalid daemon config: {0}")]
    InvalidConfig(String),

    #[error("Daemon config has no stream URL")]
    MissingStreamUrl,

    #[error("Failed to start {program}: {source}")]
    AgentSpawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed waiting on agent process: {0}")]
    AgentWait(#[source] io::Error),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
