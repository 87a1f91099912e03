use std::env;

use tracing_subscriber::EnvFilter;

pub const DEBUG_LOG_ENV: &str = "CONDUCTOR_DEBUG_LOG";

/// Stderr logging for the CLI. `CONDUCTOR_DEBUG_LOG=1` forces debug level,
/// otherwise `RUST_LOG` applies with `info` as the fallback.
pub fn init() {
    let debug_enabled = env::var(DEBUG_LOG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
