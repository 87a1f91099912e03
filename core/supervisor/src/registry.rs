//! Durable registry of spawned daemons.
//!
//! The registry is the supervisor's memory across restarts: every daemon it
//! launches is written here before the spawn is reported to the caller, and
//! boot-time rehydration starts from it.
//!
//! # File Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "daemons": [
//!     { "sessionId": "...", "pid": 4321, "daemonNonce": "...", "startedAt": "...", "config": { ... } }
//!   ]
//! }
//! ```
//!
//! # Failure Handling
//!
//! Reads never fail. A missing or unreadable file is an empty registry. An
//! unparseable file (or one with an unknown version) is copied aside as
//! `<stem>.corrupted.<timestamp>.json` and the registry starts empty.
//! Individual entries that fail validation are dropped; the rest still load.
//!
//! Writes always fail loudly. Each save goes to a temp file in the same
//! directory and is renamed over the real path, so a reader only ever sees a
//! complete file.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use conductor_protocol::DaemonConfig;
use fs_err as fs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

use crate::error::{Result, SupervisorError};

pub const REGISTRY_VERSION: u32 = 1;

/// What the supervisor remembers about one spawned daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonRecord {
    pub session_id: String,
    pub pid: u32,
    pub daemon_nonce: String,
    pub started_at: DateTime<Utc>,
    pub config: DaemonConfig,
}

impl DaemonRecord {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.pid == 0 {
            return Err("pid is zero".to_string());
        }
        self.config.validate()?;
        if self.config.session_id != self.session_id {
            return Err(format!(
                "config session id {} does not match record session id {}",
                self.config.session_id, self.session_id
            ));
        }
        if self.config.daemon_nonce != self.daemon_nonce {
            return Err("config nonce does not match record nonce".to_string());
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct RegistryFileRef<'a> {
    version: u32,
    daemons: &'a [DaemonRecord],
}

/// Entries stay untyped until validated one by one.
#[derive(Deserialize)]
struct RawRegistryFile {
    version: u32,
    #[serde(default)]
    daemons: Vec<serde_json::Value>,
}

pub struct DaemonRegistry {
    path: PathBuf,
    records: Vec<DaemonRecord>,
}

impl DaemonRegistry {
    /// Loads the registry at `path`, degrading to empty on any read problem.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = read_records(&path);
        Self { path, records }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of every record, in registration order.
    pub fn list(&self) -> Vec<DaemonRecord> {
        self.records.clone()
    }

    pub fn get(&self, session_id: &str) -> Option<&DaemonRecord> {
        self.records
            .iter()
            .find(|record| record.session_id == session_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Upserts by session id and saves before returning.
    ///
    /// An existing record for the session is replaced in place. On a failed
    /// save the in-memory state is rolled back to match the file.
    pub fn register(&mut self, record: DaemonRecord) -> Result<()> {
        let position = self
            .records
            .iter()
            .position(|existing| existing.session_id == record.session_id);
        let previous = match position {
            Some(index) => Some(std::mem::replace(&mut self.records[index], record)),
            None => {
                self.records.push(record);
                None
            }
        };

        if let Err(err) = self.save() {
            match (position, previous) {
                (Some(index), Some(previous)) => self.records[index] = previous,
                _ => {
                    self.records.pop();
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// Deletes the record for `session_id`. Returns `false` without touching
    /// the file when there was nothing to delete.
    pub fn remove(&mut self, session_id: &str) -> Result<bool> {
        let Some(index) = self
            .records
            .iter()
            .position(|record| record.session_id == session_id)
        else {
            return Ok(false);
        };

        let removed = self.records.remove(index);
        if let Err(err) = self.save() {
            self.records.insert(index, removed);
            return Err(err);
        }
        Ok(true)
    }

    /// Drops the in-memory cache and re-reads the file.
    pub fn reload(&mut self) {
        self.records = read_records(&self.path);
    }

    fn save(&self) -> Result<()> {
        let payload = serde_json::to_vec_pretty(&RegistryFileRef {
            version: REGISTRY_VERSION,
            daemons: &self.records,
        })?;

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let write_err = |source: std::io::Error| SupervisorError::RegistryWrite {
            path: self.path.clone(),
            source,
        };

        fs::create_dir_all(parent).map_err(write_err)?;
        let mut temp_file = NamedTempFile::new_in(parent).map_err(write_err)?;
        temp_file.write_all(&payload).map_err(write_err)?;
        temp_file.flush().map_err(write_err)?;
        temp_file.as_file().sync_all().map_err(write_err)?;
        temp_file
            .persist(&self.path)
            .map_err(|err| write_err(err.error))?;

        debug!(
            path = %self.path.display(),
            daemons = self.records.len(),
            "Daemon registry saved"
        );
        Ok(())
    }
}

fn read_records(path: &Path) -> Vec<DaemonRecord> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "Failed to read daemon registry; starting empty"
            );
            return Vec::new();
        }
    };

    if content.trim().is_empty() {
        return Vec::new();
    }

    let raw = match serde_json::from_str::<RawRegistryFile>(&content) {
        Ok(raw) if raw.version == REGISTRY_VERSION => raw,
        Ok(raw) => {
            return discard_corrupt(
                path,
                &format!(
                    "unsupported version {} (expected {})",
                    raw.version, REGISTRY_VERSION
                ),
            )
        }
        Err(err) => return discard_corrupt(path, &err.to_string()),
    };

    let total = raw.daemons.len();
    let records: Vec<DaemonRecord> = raw
        .daemons
        .into_iter()
        .filter_map(|value| {
            let record = serde_json::from_value::<DaemonRecord>(value)
                .map_err(|err| err.to_string())
                .and_then(|record| record.validate().map(|_| record));
            match record {
                Ok(record) => Some(record),
                Err(reason) => {
                    debug!(reason = %reason, "Dropping malformed daemon record");
                    None
                }
            }
        })
        .collect();

    let dropped = total - records.len();
    if dropped > 0 {
        warn!(
            path = %path.display(),
            dropped,
            kept = records.len(),
            "Dropped malformed daemon records"
        );
    }
    records
}

fn discard_corrupt(path: &Path, reason: &str) -> Vec<DaemonRecord> {
    let backup = backup_path(path, Utc::now());
    match fs::copy(path, &backup) {
        Ok(_) => error!(
            path = %path.display(),
            backup = %backup.display(),
            reason = %reason,
            "Daemon registry is corrupt; saved a copy and starting empty"
        ),
        Err(err) => error!(
            path = %path.display(),
            reason = %reason,
            error = %err,
            "Daemon registry is corrupt and could not be backed up; starting empty"
        ),
    }
    Vec::new()
}

fn backup_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("daemons");
    let name = format!(
        "{}.corrupted.{}.json",
        stem,
        now.format("%Y%m%dT%H%M%S%3fZ")
    );
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_protocol::AgentType;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn record(session_id: &str, pid: u32, nonce: &str) -> DaemonRecord {
        DaemonRecord {
            session_id: session_id.to_string(),
            pid,
            daemon_nonce: nonce.to_string(),
            started_at: Utc::now(),
            config: DaemonConfig::new(session_id, AgentType::Claude, "fix the bug", "/repo")
                .with_nonce(nonce),
        }
    }

    fn corrupted_backups(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .expect("read dir")
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                name.contains(".corrupted.") && name.ends_with(".json")
            })
            .collect()
    }

    #[test]
    fn missing_file_loads_empty() {
        let temp = tempdir().unwrap();
        let registry = DaemonRegistry::load(temp.path().join("daemons.json"));
        assert!(registry.is_empty());
        assert!(registry.list().is_empty());
    }

    #[test]
    fn records_survive_reload() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("daemons.json");

        let mut registry = DaemonRegistry::load(&path);
        let first = record("s1", 100, "n1");
        let second = record("s2", 200, "n2");
        registry.register(first.clone()).unwrap();
        registry.register(second.clone()).unwrap();

        let reloaded = DaemonRegistry::load(&path);
        assert_eq!(reloaded.list(), vec![first, second]);
    }

    #[test]
    fn saved_file_is_versioned() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("daemons.json");
        let mut registry = DaemonRegistry::load(&path);
        registry.register(record("s1", 100, "n1")).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["daemons"][0]["sessionId"], "s1");
        assert_eq!(value["daemons"][0]["config"]["daemonNonce"], "n1");
    }

    #[test]
    fn register_twice_keeps_one_entry() {
        let temp = tempdir().unwrap();
        let mut registry = DaemonRegistry::load(temp.path().join("daemons.json"));
        let entry = record("s1", 100, "n1");
        registry.register(entry.clone()).unwrap();
        registry.register(entry.clone()).unwrap();
        assert_eq!(registry.list(), vec![entry]);
    }

    #[test]
    fn register_replaces_in_place() {
        let temp = tempdir().unwrap();
        let mut registry = DaemonRegistry::load(temp.path().join("daemons.json"));
        registry.register(record("s1", 100, "n1")).unwrap();
        registry.register(record("s2", 200, "n2")).unwrap();
        registry.register(record("s1", 300, "n3")).unwrap();

        let ids: Vec<_> = registry
            .list()
            .into_iter()
            .map(|r| (r.session_id, r.pid))
            .collect();
        assert_eq!(
            ids,
            vec![("s1".to_string(), 300), ("s2".to_string(), 200)]
        );
    }

    #[test]
    fn remove_deletes_and_persists() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("daemons.json");
        let mut registry = DaemonRegistry::load(&path);
        registry.register(record("s1", 100, "n1")).unwrap();

        assert!(registry.remove("s1").unwrap());
        assert!(registry.get("s1").is_none());
        assert!(DaemonRegistry::load(&path).is_empty());
    }

    #[test]
    fn remove_absent_does_not_touch_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("daemons.json");
        let mut registry = DaemonRegistry::load(&path);
        registry.register(record("s1", 100, "n1")).unwrap();

        let before = fs::metadata(&path).unwrap().modified().unwrap();
        let content_before = fs::read_to_string(&path).unwrap();
        thread::sleep(Duration::from_millis(20));

        assert!(!registry.remove("missing").unwrap());

        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), before);
        assert_eq!(fs::read_to_string(&path).unwrap(), content_before);
    }

    #[test]
    fn remove_absent_on_fresh_registry_creates_no_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("daemons.json");
        let mut registry = DaemonRegistry::load(&path);
        assert!(!registry.remove("missing").unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_file_is_backed_up_and_loads_empty() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("daemons.json");
        fs::write(&path, "{not json").unwrap();

        let registry = DaemonRegistry::load(&path);
        assert!(registry.is_empty());

        let backups = corrupted_backups(temp.path());
        assert_eq!(backups.len(), 1);
        let name = backups[0].file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("daemons.corrupted."));
        assert_eq!(fs::read_to_string(&backups[0]).unwrap(), "{not json");
    }

    #[test]
    fn unknown_version_is_treated_as_corrupt() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("daemons.json");
        fs::write(&path, r#"{"version":2,"daemons":[]}"#).unwrap();

        assert!(DaemonRegistry::load(&path).is_empty());
        assert_eq!(corrupted_backups(temp.path()).len(), 1);
    }

    #[test]
    fn malformed_entries_are_dropped_individually() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("daemons.json");
        let good = record("good", 100, "n1");
        let mut nonce_mismatch = serde_json::to_value(record("mismatch", 101, "n2")).unwrap();
        nonce_mismatch["daemonNonce"] = serde_json::json!("other");
        let file = serde_json::json!({
            "version": 1,
            "daemons": [
                serde_json::to_value(&good).unwrap(),
                { "sessionId": "no-config", "pid": 5, "daemonNonce": "x", "startedAt": "2026-01-31T00:00:00Z" },
                { "sessionId": "bad-pid", "pid": "abc", "daemonNonce": "x", "startedAt": "2026-01-31T00:00:00Z", "config": {} },
                nonce_mismatch,
                42
            ]
        });
        fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        let registry = DaemonRegistry::load(&path);
        assert_eq!(registry.list(), vec![good]);
        assert!(corrupted_backups(temp.path()).is_empty());
    }

    #[test]
    fn reload_discards_in_memory_state() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("daemons.json");
        let mut registry = DaemonRegistry::load(&path);
        registry.register(record("s1", 100, "n1")).unwrap();

        let mut other_incarnation = DaemonRegistry::load(&path);
        other_incarnation.remove("s1").unwrap();
        other_incarnation.register(record("s9", 900, "n9")).unwrap();

        registry.reload();
        let ids: Vec<_> = registry.list().into_iter().map(|r| r.session_id).collect();
        assert_eq!(ids, vec!["s9".to_string()]);
    }

    #[test]
    fn write_failure_propagates_and_rolls_back() {
        let temp = tempdir().unwrap();
        let blocker = temp.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();
        let mut registry = DaemonRegistry::load(blocker.join("daemons.json"));

        let err = registry.register(record("s1", 100, "n1")).unwrap_err();
        assert!(matches!(err, SupervisorError::RegistryWrite { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn backup_name_matches_corrupted_pattern() {
        let now = DateTime::parse_from_rfc3339("2026-01-31T08:09:10.123Z")
            .unwrap()
            .with_timezone(&Utc);
        let backup = backup_path(Path::new("/state/daemons.json"), now);
        assert_eq!(
            backup,
            PathBuf::from("/state/daemons.corrupted.20260131T080910123Z.json")
        );
    }
}
