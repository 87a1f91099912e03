//! Agent CLI invocations.
//!
//! Each agent type maps to a default program on `PATH` and a non-interactive
//! argument layout. `CONDUCTOR_<AGENT>_BIN` replaces the program.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

use conductor_protocol::{AgentType, DaemonConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl AgentInvocation {
    pub fn for_config(config: &DaemonConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let program = lookup(&bin_override_var(config.agent_type))
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(default_program(config.agent_type)));
        Self {
            program,
            args: agent_args(config).into_iter().map(OsString::from).collect(),
        }
    }

    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

pub fn bin_override_var(agent_type: AgentType) -> String {
    format!("CONDUCTOR_{}_BIN", agent_type.as_str().to_ascii_uppercase())
}

fn default_program(agent_type: AgentType) -> &'static str {
    match agent_type {
        AgentType::Claude => "claude",
        AgentType::Codex => "codex",
        AgentType::Gemini => "gemini",
        AgentType::Opencode => "opencode",
    }
}

fn agent_args(config: &DaemonConfig) -> Vec<String> {
    let model = config.model.as_deref().filter(|m| !m.is_empty());
    let mut args: Vec<String> = Vec::new();
    match config.agent_type {
        AgentType::Claude => {
            args.extend(["-p".to_string(), config.prompt.clone()]);
            args.extend([
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--verbose".to_string(),
            ]);
            if let Some(model) = model {
                args.extend(["--model".to_string(), model.to_string()]);
            }
            if let Some(resume) = config.resume_session_id.as_deref() {
                args.extend(["--resume".to_string(), resume.to_string()]);
            }
        }
        AgentType::Codex => {
            args.extend(["exec".to_string(), "--json".to_string()]);
            if let Some(model) = model {
                args.extend(["-m".to_string(), model.to_string()]);
            }
            args.push(config.prompt.clone());
        }
        AgentType::Gemini => {
            args.extend(["-p".to_string(), config.prompt.clone()]);
            if let Some(model) = model {
                args.extend(["-m".to_string(), model.to_string()]);
            }
        }
        AgentType::Opencode => {
            args.push("run".to_string());
            if let Some(model) = model {
                args.extend(["--model".to_string(), model.to_string()]);
            }
            args.push(config.prompt.clone());
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(agent_type: AgentType) -> DaemonConfig {
        DaemonConfig::new("s1", agent_type, "add tests", "/repo").with_nonce("n1")
    }

    fn args_of(invocation: &AgentInvocation) -> Vec<&str> {
        invocation
            .args
            .iter()
            .map(|arg| arg.to_str().unwrap())
            .collect()
    }

    #[test]
    fn claude_streams_json_and_resumes() {
        let mut config = config(AgentType::Claude);
        config.model = Some("opus".to_string());
        config.resume_session_id = Some("prev".to_string());

        let invocation = AgentInvocation::for_config(&config, |_| None);
        assert_eq!(invocation.program, PathBuf::from("claude"));
        assert_eq!(
            args_of(&invocation),
            vec![
                "-p",
                "add tests",
                "--output-format",
                "stream-json",
                "--verbose",
                "--model",
                "opus",
                "--resume",
                "prev"
            ]
        );
    }

    #[test]
    fn codex_puts_prompt_last() {
        let mut config = config(AgentType::Codex);
        config.model = Some("o3".to_string());
        let invocation = AgentInvocation::for_config(&config, |_| None);
        assert_eq!(
            args_of(&invocation),
            vec!["exec", "--json", "-m", "o3", "add tests"]
        );
    }

    #[test]
    fn empty_model_is_omitted() {
        let mut config = config(AgentType::Gemini);
        config.model = Some(String::new());
        let invocation = AgentInvocation::for_config(&config, |_| None);
        assert_eq!(args_of(&invocation), vec!["-p", "add tests"]);
    }

    #[test]
    fn opencode_uses_run() {
        let invocation = AgentInvocation::for_config(&config(AgentType::Opencode), |_| None);
        assert_eq!(invocation.program, PathBuf::from("opencode"));
        assert_eq!(args_of(&invocation), vec!["run", "add tests"]);
    }

    #[test]
    fn program_override_from_env() {
        let invocation = AgentInvocation::for_config(&config(AgentType::Codex), |key| {
            (key == "CONDUCTOR_CODEX_BIN").then(|| "/opt/codex/bin/codex".to_string())
        });
        assert_eq!(invocation.program, PathBuf::from("/opt/codex/bin/codex"));
        assert_eq!(bin_override_var(AgentType::Opencode), "CONDUCTOR_OPENCODE_BIN");
    }
}
