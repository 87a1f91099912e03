//! Termination signal relay.
//!
//! The supervisor signals the daemon's whole process group, so the agent
//! normally receives the signal itself. When only the daemon is signalled the
//! relay passes it on. Either way the daemon stays up long enough to record how
//! the agent exited.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

static PENDING: AtomicI32 = AtomicI32::new(0);

const RELAY_INTERVAL: Duration = Duration::from_millis(100);

extern "C" fn record_signal(signal: libc::c_int) {
    PENDING.store(signal, Ordering::SeqCst);
}

/// Replaces the default disposition of SIGTERM, SIGINT and SIGHUP with a
/// handler that only records the signal. Handlers reset to default across
/// `exec`, so the agent keeps normal signal behaviour.
pub fn install() {
    let handler: extern "C" fn(libc::c_int) = record_signal;
    for signal in [libc::SIGTERM, libc::SIGINT, libc::SIGHUP] {
        // SAFETY: the handler only performs an atomic store.
        let previous = unsafe { libc::signal(signal, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            warn!(signal, "Failed to install signal handler");
        }
    }
}

/// Relays recorded signals to `pid` until dropped.
pub struct Relay {
    done: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Relay {
    pub fn start(pid: u32) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let handle = thread::Builder::new()
            .name("signal-relay".to_string())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    let signal = PENDING.swap(0, Ordering::SeqCst);
                    if signal != 0 {
                        debug!(pid, signal, "Relaying signal to agent");
                        // SAFETY: kill has no memory-safety preconditions.
                        unsafe {
                            libc::kill(pid as libc::pid_t, signal);
                        }
                    }
                    thread::sleep(RELAY_INTERVAL);
                }
            })
            .map_err(|err| warn!(error = %err, "Failed to start signal relay"))
            .ok();
        Self { done, handle }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.done.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
