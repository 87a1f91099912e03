use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::validate_session_id;

/// Agent CLIs a daemon knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Claude,
    Codex,
    Gemini,
    Opencode,
}

impl AgentType {
    pub const ALL: [AgentType; 4] = [
        AgentType::Claude,
        AgentType::Codex,
        AgentType::Gemini,
        AgentType::Opencode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Claude => "claude",
            AgentType::Codex => "codex",
            AgentType::Gemini => "gemini",
            AgentType::Opencode => "opencode",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown agent type {0:?} (expected one of: claude, codex, gemini, opencode)")]
pub struct UnknownAgentType(pub String);

impl FromStr for AgentType {
    type Err = UnknownAgentType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        AgentType::ALL
            .into_iter()
            .find(|agent| agent.as_str() == normalized)
            .ok_or_else(|| UnknownAgentType(value.to_string()))
    }
}

/// Everything needed to (re)launch one agent session.
///
/// Persisted verbatim inside the supervisor's registry and passed to the daemon
/// on its command line. The nonce is the same value the registry stores next to
/// the pid; the daemon echoes it into its `daemon_started` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    pub session_id: String,
    pub agent_type: AgentType,
    pub prompt: String,
    pub working_dir: PathBuf,
    pub daemon_nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Agent-side conversation id to continue instead of starting fresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Stream server this session publishes into. `None` means the
    /// supervisor's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
}

impl DaemonConfig {
    /// Builds a config with no nonce yet; the supervisor fills one in at spawn.
    pub fn new(
        session_id: impl Into<String>,
        agent_type: AgentType,
        prompt: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            agent_type,
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            daemon_nonce: String::new(),
            model: None,
            resume_session_id: None,
            task_id: None,
            stream_url: None,
        }
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.daemon_nonce = nonce.into();
        self
    }

    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = Some(url.into());
        self
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        validate_session_id(&self.session_id)?;
        if self.daemon_nonce.trim().is_empty() {
            return Err("daemon nonce is empty".to_string());
        }
        if self.working_dir.as_os_str().is_empty() {
            return Err("working directory is empty".to_string());
        }
        Ok(())
    }
}
