//! conductor-agent-daemon: one detached agent session.
//!
//! Launched by the supervisor with all stdio closed, so everything it has to
//! say goes either to the session stream or to its rolling log file.
//!
//! The first thing written to the stream is a `daemon_started` event carrying
//! this process's pid and the nonce from the config. A supervisor restarting
//! later re-attaches this daemon only if that event matches its registry.

mod agent;
mod error;
mod logging;
mod runner;
mod signals;

use std::env;
use std::path::PathBuf;

use clap::Parser;
use conductor_protocol::{DaemonConfig, FileStream};

use crate::agent::AgentInvocation;
use crate::error::{DaemonError, Result};

#[derive(Parser)]
#[command(name = "conductor-agent-daemon")]
#[command(about = "Runs one coding-agent session and mirrors it into a session stream")]
#[command(version)]
struct Cli {
    /// Daemon config as JSON
    #[arg(long, value_name = "JSON")]
    config: String,

    /// Directory for the rolling log file
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    let guard = logging::init(cli.log_dir.clone());

    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Agent daemon failed");
            1
        }
    };

    // process::exit skips destructors; flush the log writer first.
    drop(guard);
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    let config: DaemonConfig = serde_json::from_str(&cli.config)
        .map_err(|err| DaemonError::InvalidConfig(err.to_string()))?;
    config.validate().map_err(DaemonError::InvalidConfig)?;

    let _span = tracing::info_span!("daemon", session_id = %config.session_id).entered();

    let url = config
        .stream_url
        .as_deref()
        .ok_or(DaemonError::MissingStreamUrl)?;
    let stream = FileStream::open(url)?;

    signals::install();
    let invocation = AgentInvocation::for_config(&config, |key| env::var(key).ok());
    runner::run(&config, &stream, &invocation)
}
