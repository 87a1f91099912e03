//! Boot-time reconciliation of persisted daemons.
//!
//! Every record in the registry ends one boot pass in exactly one state:
//!
//! - **dead**: the pid fails the liveness check. The record is pruned.
//! - **stale**: the pid is alive, but the session's most recent
//!   `daemon_started` event does not carry the same pid and nonce. The OS has
//!   recycled the pid for something else, or the daemon never attested itself.
//!   The record is pruned.
//! - **valid**: pid and nonce match the daemon's own attestation. The monitor
//!   resumes supervision without restarting anything.
//!
//! A record whose stream history cannot be read is left untouched until the
//! next boot: neither pruned nor attached. So is a record with no attestation
//! yet that is younger than the attestation grace period, since the registry
//! is written before the daemon has had a chance to append `daemon_started`.
//!
//! The outcome depends only on the record, the OS and the stream history, so
//! running the pass again re-derives the same result.

use std::time::Duration;

use chrono::Utc;
use conductor_protocol::{DaemonStartedEvent, SessionStreamEvent};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::health;
use crate::monitor::ProcessMonitor;
use crate::registry::DaemonRecord;
use crate::streams::{StreamClientCache, StreamConnector};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RehydrationReport {
    pub restored: Vec<String>,
    pub pruned: Vec<String>,
    pub skipped: Vec<String>,
}

/// How long a freshly registered daemon may go without attesting before its
/// record counts as stale.
pub const DEFAULT_ATTEST_GRACE: Duration = Duration::from_secs(10);

enum Verdict {
    Dead,
    Stale,
    Valid,
    Unverified,
}

/// Reloads the registry and re-attaches every daemon that proves its identity.
///
/// Whatever the monitor tracked before the pass is dropped first; only records
/// found valid on disk end up tracked. Registry write failures while pruning
/// are returned; everything else is logged and folded into the report.
pub fn rehydrate_daemons_on_boot(
    monitor: &mut ProcessMonitor,
    connector: &dyn StreamConnector,
    default_stream_url: &str,
    attest_grace: Duration,
) -> Result<RehydrationReport> {
    monitor.registry_mut().reload();
    let dropped = monitor.detach_all();
    if dropped > 0 {
        debug!(dropped, "Discarded in-memory daemons before rehydration");
    }
    let records = monitor.registry().list();
    let mut streams = StreamClientCache::new(connector);
    let mut report = RehydrationReport::default();

    for record in records {
        match judge(&record, &mut streams, default_stream_url, attest_grace) {
            Verdict::Valid => {
                monitor.attach_daemon(&record);
                report.restored.push(record.session_id);
            }
            Verdict::Dead | Verdict::Stale => {
                monitor.registry_mut().remove(&record.session_id)?;
                report.pruned.push(record.session_id);
            }
            Verdict::Unverified => report.skipped.push(record.session_id),
        }
    }

    info!(
        restored = report.restored.len(),
        pruned = report.pruned.len(),
        skipped = report.skipped.len(),
        "Daemon rehydration complete"
    );
    Ok(report)
}

fn judge(
    record: &DaemonRecord,
    streams: &mut StreamClientCache<'_>,
    default_stream_url: &str,
    attest_grace: Duration,
) -> Verdict {
    if !health::is_process_running(record.pid) {
        debug!(session_id = %record.session_id, pid = record.pid, "Pruning daemon with dead pid");
        return Verdict::Dead;
    }

    let url = record
        .config
        .stream_url
        .as_deref()
        .unwrap_or(default_stream_url);
    let history = streams
        .client(url)
        .and_then(|client| client.read_session(&record.session_id));
    let events = match history {
        Ok(events) => events,
        Err(err) => {
            warn!(
                session_id = %record.session_id,
                url = %url,
                error = %err,
                "Could not read session stream; leaving daemon record for next boot"
            );
            return Verdict::Unverified;
        }
    };

    match latest_daemon_started(&events) {
        Some(started) if identity_matches(record, started) => Verdict::Valid,
        Some(started) => {
            debug!(
                session_id = %record.session_id,
                pid = record.pid,
                attested_pid = started.pid,
                "Pruning daemon whose identity does not match its attestation"
            );
            Verdict::Stale
        }
        None if is_within_grace(record, attest_grace) => {
            debug!(
                session_id = %record.session_id,
                pid = record.pid,
                "Daemon has not attested yet; leaving record for next boot"
            );
            Verdict::Unverified
        }
        None => {
            debug!(
                session_id = %record.session_id,
                pid = record.pid,
                "Pruning daemon that never attested itself"
            );
            Verdict::Stale
        }
    }
}

/// A `started_at` in the future (clock skew) counts as young.
fn is_within_grace(record: &DaemonRecord, attest_grace: Duration) -> bool {
    Utc::now()
        .signed_duration_since(record.started_at)
        .to_std()
        .map_or(true, |age| age < attest_grace)
}

/// Most recent `daemon_started` event in a session history.
pub fn latest_daemon_started(events: &[SessionStreamEvent]) -> Option<&DaemonStartedEvent> {
    events.iter().rev().find_map(|event| match event {
        SessionStreamEvent::DaemonStarted(started) => Some(started),
        _ => None,
    })
}

pub fn identity_matches(record: &DaemonRecord, started: &DaemonStartedEvent) -> bool {
    started.pid == record.pid && started.daemon_nonce == record.daemon_nonce
}
