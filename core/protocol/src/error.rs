use std::path::PathBuf;

/// Errors raised by session stream clients.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Invalid session id {session_id:?}: {reason}")]
    InvalidSessionId { session_id: String, reason: String },

    #[error("Unsupported stream url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Stream I/O error: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode stream event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Stream unavailable: {0}")]
    Unavailable(String),
}

impl StreamError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StreamError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
