//! Error types for the supervisor.
//!
//! Only failures that threaten durability or that the caller must act on are
//! errors. Corrupt registry files, dead pids and stale identities are expected
//! conditions and are handled (and logged) where they are found.

use std::path::PathBuf;

use conductor_protocol::StreamError;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    // ─────────────────────────────────────────────────────────────────────
    // Registry
    // ─────────────────────────────────────────────────────────────────────
    #[error("Failed to write daemon registry {path}: {source}")]
    RegistryWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize daemon registry: {0}")]
    RegistrySerialize(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────────────
    // Processes
    // ─────────────────────────────────────────────────────────────────────
    #[error("Failed to spawn daemon for session {session_id}: {source}")]
    Spawn {
        session_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid daemon config: {0}")]
    InvalidConfig(String),

    // ─────────────────────────────────────────────────────────────────────
    // Streams
    // ─────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    Stream(#[from] StreamError),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration error: {path}: {details}")]
    Config { path: PathBuf, details: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
