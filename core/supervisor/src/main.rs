//! conductor: command-line front end for the daemon supervisor.
//!
//! Every invocation boots the supervisor first, so the registry is rehydrated
//! (and unverifiable entries pruned) before any command reads daemon state.
//!
//! ## Subcommands
//!
//! - `spawn`: launch a detached agent daemon
//! - `cancel`: signal a daemon and forget it
//! - `list` / `stats`: inspect supervised daemons
//! - `prune`: drop daemons whose process has exited
//! - `tail`: follow a session's event stream
//! - `shutdown`: signal every supervised daemon

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use conductor_protocol::{AgentType, DaemonConfig};
use conductor_supervisor::{logging, StopSignal, Supervisor, SupervisorConfig};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Supervise detached coding-agent daemons")]
#[command(version)]
struct Cli {
    /// Config file (defaults to <home>/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch an agent session as a detached daemon
    Spawn {
        /// Agent CLI to run (claude, codex, gemini, opencode)
        #[arg(long)]
        agent: AgentType,

        #[arg(long)]
        prompt: String,

        /// Working directory for the agent (defaults to the current directory)
        #[arg(long, value_name = "DIR")]
        cwd: Option<PathBuf>,

        /// Session ID (a fresh ULID when omitted)
        #[arg(long)]
        session_id: Option<String>,

        #[arg(long)]
        model: Option<String>,

        /// Agent-side session to resume
        #[arg(long)]
        resume: Option<String>,

        #[arg(long)]
        task_id: Option<String>,

        /// Stream the daemon publishes to (defaults to the configured stream)
        #[arg(long)]
        stream_url: Option<String>,
    },

    /// Signal a daemon and remove it from supervision
    Cancel {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,

        #[arg(long, default_value = "SIGTERM")]
        signal: StopSignal,
    },

    /// List supervised daemons
    List,

    /// Aggregate counts of supervised daemons
    Stats,

    /// Remove daemons whose process is no longer running
    Prune,

    /// Follow a session's event stream (Ctrl-C to stop)
    Tail {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,
    },

    /// Signal every supervised daemon
    Shutdown {
        #[arg(long, default_value = "SIGTERM")]
        signal: StopSignal,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        tracing::error!(error = %e, "conductor failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = SupervisorConfig::load(cli.config)?;
    let mut supervisor = Supervisor::new(config);
    let report = supervisor.boot()?;
    tracing::debug!(
        restored = report.restored.len(),
        pruned = report.pruned.len(),
        skipped = report.skipped.len(),
        "Boot complete"
    );

    match cli.command {
        Commands::Spawn {
            agent,
            prompt,
            cwd,
            session_id,
            model,
            resume,
            task_id,
            stream_url,
        } => {
            let working_dir = match cwd {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            let session_id = session_id.unwrap_or_else(|| ulid::Ulid::new().to_string());
            let mut daemon_config = DaemonConfig::new(session_id, agent, prompt, working_dir);
            daemon_config.model = model;
            daemon_config.resume_session_id = resume;
            daemon_config.task_id = task_id;
            daemon_config.stream_url = stream_url;
            print_json(&supervisor.spawn(daemon_config)?)?;
        }
        Commands::Cancel { session_id, signal } => {
            print_json(&supervisor.cancel(&session_id, signal)?)?;
        }
        Commands::List => print_json(&supervisor.list())?,
        Commands::Stats => print_json(&supervisor.stats())?,
        Commands::Prune => print_json(&supervisor.prune()?)?,
        Commands::Tail { session_id } => {
            let stdout = io::stdout();
            for event in supervisor.subscribe(&session_id)? {
                let line = serde_json::to_string(&event?)?;
                let mut out = stdout.lock();
                writeln!(out, "{line}")?;
                out.flush()?;
            }
        }
        Commands::Shutdown { signal } => {
            let signalled = supervisor.shutdown(signal);
            print_json(&serde_json::json!({ "signalled": signalled }))?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}
