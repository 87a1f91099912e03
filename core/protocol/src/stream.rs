//! Session stream contract and the local file-backed implementation.
//!
//! Each session owns one append-only JSONL file, `<dir>/<session_id>.jsonl`.
//! Writers append whole lines with a single write call; readers tolerate a torn
//! trailing line (a writer that crashed mid-append) by skipping anything that
//! does not decode.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use fs_err as fs;
use tracing::{debug, warn};

use crate::error::{Result, StreamError};
use crate::{validate_session_id, SessionStreamEvent};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const FILE_URL_SCHEME: &str = "file://";

/// Live tail of one session's events.
pub type EventIter = Box<dyn Iterator<Item = Result<SessionStreamEvent>> + Send>;

/// Read side of the stream collaborator.
pub trait SessionStream: Send + Sync {
    /// Full ordered history of a session. A session that never published
    /// anything has an empty history.
    fn read_session(&self, session_id: &str) -> Result<Vec<SessionStreamEvent>>;

    /// Replays the history, then keeps yielding events as they are appended.
    fn subscribe_to_session(&self, session_id: &str) -> Result<EventIter>;
}

#[derive(Debug, Clone)]
pub struct FileStream {
    dir: PathBuf,
    poll_interval: Duration,
}

impl FileStream {
    /// Opens (and creates if needed) the stream directory named by `url`.
    ///
    /// Accepts `file:///abs/dir` or a plain filesystem path.
    pub fn open(url: &str) -> Result<Self> {
        let dir = dir_from_url(url)?;
        fs::create_dir_all(&dir).map_err(|err| StreamError::io(&dir, err))?;
        Ok(Self {
            dir,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn append(&self, session_id: &str, event: &SessionStreamEvent) -> Result<()> {
        let path = self.session_path(session_id)?;
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| StreamError::io(&path, err))?;
        file.write_all(&line)
            .map_err(|err| StreamError::io(&path, err))?;
        file.sync_data()
            .map_err(|err| StreamError::io(&path, err))?;
        Ok(())
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id).map_err(|reason| StreamError::InvalidSessionId {
            session_id: session_id.to_string(),
            reason,
        })?;
        Ok(self.dir.join(format!("{}.jsonl", session_id)))
    }
}

impl SessionStream for FileStream {
    fn read_session(&self, session_id: &str) -> Result<Vec<SessionStreamEvent>> {
        let path = self.session_path(session_id)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StreamError::io(&path, err)),
        };

        Ok(data
            .split(|byte| *byte == b'\n')
            .filter_map(|line| decode_line(&path, line))
            .collect())
    }

    fn subscribe_to_session(&self, session_id: &str) -> Result<EventIter> {
        let path = self.session_path(session_id)?;
        Ok(Box::new(Subscription::new(path, self.poll_interval)))
    }
}

/// Blocking tail over a session file. Never ends on its own; drop it to stop.
pub struct Subscription {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
    pending: VecDeque<SessionStreamEvent>,
    poll_interval: Duration,
}

impl Subscription {
    fn new(path: PathBuf, poll_interval: Duration) -> Self {
        Self {
            path,
            offset: 0,
            partial: Vec::new(),
            pending: VecDeque::new(),
            poll_interval,
        }
    }

    fn poll(&mut self) -> Result<()> {
        let mut file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(StreamError::io(&self.path, err)),
        };
        file.seek(SeekFrom::Start(self.offset))
            .map_err(|err| StreamError::io(&self.path, err))?;

        let mut chunk = Vec::new();
        let read = file
            .read_to_end(&mut chunk)
            .map_err(|err| StreamError::io(&self.path, err))?;
        self.offset += read as u64;
        self.partial.extend_from_slice(&chunk);

        // Only complete lines are decoded; a trailing fragment waits for the
        // rest of its write.
        while let Some(index) = self.partial.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=index).collect();
            if let Some(event) = decode_line(&self.path, &line[..index]) {
                self.pending.push_back(event);
            }
        }
        Ok(())
    }
}

impl Iterator for Subscription {
    type Item = Result<SessionStreamEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if let Err(err) = self.poll() {
                return Some(Err(err));
            }
            if self.pending.is_empty() {
                thread::sleep(self.poll_interval);
            }
        }
    }
}

fn decode_line(path: &Path, line: &[u8]) -> Option<SessionStreamEvent> {
    if line.iter().all(|byte| byte.is_ascii_whitespace()) {
        return None;
    }
    match serde_json::from_slice(line) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "Skipping undecodable stream line"
            );
            None
        }
    }
}

fn dir_from_url(url: &str) -> Result<PathBuf> {
    let trimmed = url.trim();
    let raw = match trimmed.strip_prefix(FILE_URL_SCHEME) {
        Some(rest) => rest,
        None if trimmed.contains("://") => {
            return Err(StreamError::InvalidUrl {
                url: url.to_string(),
                reason: "only file:// stream urls are supported by the local stream".to_string(),
            })
        }
        None => trimmed,
    };
    if raw.is_empty() {
        return Err(StreamError::InvalidUrl {
            url: url.to_string(),
            reason: "stream location is empty".to_string(),
        });
    }
    debug!(url = %url, dir = %raw, "Resolved stream directory");
    Ok(PathBuf::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgentOutputEvent, DaemonStartedEvent, OutputStream};

    fn started(session_id: &str, pid: u32, nonce: &str) -> SessionStreamEvent {
        SessionStreamEvent::DaemonStarted(DaemonStartedEvent::new(session_id, pid, nonce, None))
    }

    #[test]
    fn append_then_read_preserves_order() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let stream = FileStream::open(temp_dir.path().to_str().expect("utf8")).expect("open");

        let first = started("s1", 10, "n1");
        let second = SessionStreamEvent::AgentOutput(AgentOutputEvent::new(
            "s1",
            OutputStream::Stdout,
            "hello",
        ));
        stream.append("s1", &first).expect("append first");
        stream.append("s1", &second).expect("append second");

        let events = stream.read_session("s1").expect("read");
        assert_eq!(events, vec![first, second]);
    }

    #[test]
    fn missing_session_has_empty_history() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let stream = FileStream::open(temp_dir.path().to_str().expect("utf8")).expect("open");
        assert!(stream.read_session("never-started").expect("read").is_empty());
    }

    #[test]
    fn torn_trailing_line_is_skipped() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let stream = FileStream::open(temp_dir.path().to_str().expect("utf8")).expect("open");
        let event = started("s1", 10, "n1");
        stream.append("s1", &event).expect("append");

        let path = temp_dir.path().join("s1.jsonl");
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open for append");
        file.write_all(br#"{"type":"daemon_started","sessionId":"#)
            .expect("write torn line");

        let events = stream.read_session("s1").expect("read");
        assert_eq!(events, vec![event]);
    }

    #[test]
    fn accepts_file_urls_and_rejects_other_schemes() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let url = format!("file://{}", temp_dir.path().join("streams").display());
        let stream = FileStream::open(&url).expect("open file url");
        assert!(stream.dir().ends_with("streams"));
        assert!(stream.dir().is_dir());

        assert!(matches!(
            FileStream::open("http://localhost:4437"),
            Err(StreamError::InvalidUrl { .. })
        ));
        assert!(matches!(
            FileStream::open("  "),
            Err(StreamError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn rejects_session_ids_that_escape_the_directory() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let stream = FileStream::open(temp_dir.path().to_str().expect("utf8")).expect("open");
        assert!(matches!(
            stream.read_session("../etc/passwd"),
            Err(StreamError::InvalidSessionId { .. })
        ));
    }

    #[test]
    fn subscription_replays_history_then_follows_appends() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let stream = FileStream::open(temp_dir.path().to_str().expect("utf8"))
            .expect("open")
            .with_poll_interval(Duration::from_millis(10));
        let first = started("s1", 10, "n1");
        stream.append("s1", &first).expect("append");

        let mut subscription = stream.subscribe_to_session("s1").expect("subscribe");
        assert_eq!(subscription.next().expect("item").expect("event"), first);

        let writer = stream.clone();
        let second = started("s1", 11, "n2");
        let expected = second.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            writer.append("s1", &second).expect("append second");
        });

        assert_eq!(subscription.next().expect("item").expect("event"), expected);
        handle.join().expect("writer thread");
    }
}
