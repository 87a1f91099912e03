//! Session stream event shapes.
//!
//! Events are JSON objects tagged by `type`. Only the daemon lifecycle events
//! are modelled here; anything else a stream carries decodes as
//! [`SessionStreamEvent::Unknown`] and is ignored by the supervisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::AgentType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionStreamEvent {
    DaemonStarted(DaemonStartedEvent),
    AgentOutput(AgentOutputEvent),
    DaemonExited(DaemonExitedEvent),
    #[serde(other)]
    Unknown,
}

impl SessionStreamEvent {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            SessionStreamEvent::DaemonStarted(event) => Some(&event.session_id),
            SessionStreamEvent::AgentOutput(event) => Some(&event.session_id),
            SessionStreamEvent::DaemonExited(event) => Some(&event.session_id),
            SessionStreamEvent::Unknown => None,
        }
    }
}

/// Self-attestation appended by a daemon as soon as it starts.
///
/// The registry is written by the parent, so it can only claim which pid it
/// launched. This event is written by the child itself and carries the nonce it
/// was handed, which is what proves a live pid is still the same daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStartedEvent {
    pub event_id: String,
    pub session_id: String,
    pub pid: u32,
    pub daemon_nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<AgentType>,
    pub recorded_at: DateTime<Utc>,
}

impl DaemonStartedEvent {
    pub fn new(
        session_id: impl Into<String>,
        pid: u32,
        daemon_nonce: impl Into<String>,
        agent_type: Option<AgentType>,
    ) -> Self {
        Self {
            event_id: new_event_id(),
            session_id: session_id.into(),
            pid,
            daemon_nonce: daemon_nonce.into(),
            agent_type,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line the agent CLI printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutputEvent {
    pub event_id: String,
    pub session_id: String,
    pub stream: OutputStream,
    pub line: String,
    pub recorded_at: DateTime<Utc>,
}

impl AgentOutputEvent {
    pub fn new(session_id: impl Into<String>, stream: OutputStream, line: impl Into<String>) -> Self {
        Self {
            event_id: new_event_id(),
            session_id: session_id.into(),
            stream,
            line: line.into(),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonExitedEvent {
    pub event_id: String,
    pub session_id: String,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Signal number when the agent was terminated by a signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    pub recorded_at: DateTime<Utc>,
}

impl DaemonExitedEvent {
    pub fn new(
        session_id: impl Into<String>,
        pid: u32,
        exit_code: Option<i32>,
        signal: Option<i32>,
    ) -> Self {
        Self {
            event_id: new_event_id(),
            session_id: session_id.into(),
            pid,
            exit_code,
            signal,
            recorded_at: Utc::now(),
        }
    }
}

fn new_event_id() -> String {
    Ulid::new().to_string()
}
