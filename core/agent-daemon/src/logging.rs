use std::env;
use std::path::PathBuf;

use fs_err as fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "agent-daemon.log";

/// Daily rolling file logging. The returned guard flushes on drop and must be
/// held until the process exits. Without a usable directory nothing is logged.
pub fn init(log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    let dir = log_dir.or_else(default_log_dir)?;
    if fs::create_dir_all(&dir).is_err() {
        return None;
    }

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let debug_enabled = env::var("CONDUCTOR_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;

    Some(guard)
}

fn default_log_dir() -> Option<PathBuf> {
    match env::var("CONDUCTOR_HOME") {
        Ok(home) if !home.trim().is_empty() => Some(PathBuf::from(home).join("logs")),
        _ => dirs::home_dir().map(|home| home.join(".conductor").join("logs")),
    }
}
