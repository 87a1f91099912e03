//! Types shared by the conductor supervisor and its agent daemons.
//!
//! The supervisor writes [`DaemonConfig`] into its registry and hands the same
//! config to the daemon it spawns. The daemon publishes [`SessionStreamEvent`]s
//! into the session stream, and the supervisor reads them back during boot-time
//! rehydration. Keeping both halves in one crate prevents schema drift between
//! the writer and the reader.

mod config;
mod error;
mod event;
mod stream;

pub use config::{AgentType, DaemonConfig, UnknownAgentType};
pub use error::{Result, StreamError};
pub use event::{
    AgentOutputEvent, DaemonExitedEvent, DaemonStartedEvent, OutputStream, SessionStreamEvent,
};
pub use stream::{EventIter, FileStream, SessionStream, Subscription, DEFAULT_POLL_INTERVAL};

/// Longest session id accepted anywhere in the system.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Checks that a session id is safe to use as a stream file name.
///
/// Allowed: ASCII letters, digits, `.`, `_` and `-`, between 1 and
/// [`MAX_SESSION_ID_LEN`] characters, and not made of dots alone.
pub fn validate_session_id(session_id: &str) -> std::result::Result<(), String> {
    if session_id.is_empty() {
        return Err("session id is empty".to_string());
    }
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(format!(
            "session id exceeds {} characters",
            MAX_SESSION_ID_LEN
        ));
    }
    if session_id.chars().all(|c| c == '.') {
        return Err("session id cannot consist of dots only".to_string());
    }
    if let Some(bad) = session_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(format!("session id contains invalid character {:?}", bad));
    }
    Ok(())
}
