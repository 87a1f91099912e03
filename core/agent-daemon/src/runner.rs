use std::io::{self, BufRead, BufReader, Read};
use std::process::{ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use conductor_protocol::{
    AgentOutputEvent, DaemonConfig, DaemonExitedEvent, DaemonStartedEvent, FileStream,
    OutputStream, SessionStreamEvent,
};
use tracing::{debug, info, warn};

use crate::agent::AgentInvocation;
use crate::error::{DaemonError, Result};
use crate::signals::Relay;

/// Exit status reported when the agent program cannot be started.
const SPAWN_FAILED_CODE: i32 = 127;

/// Longest output line kept in one event. Longer lines are split across
/// several events.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Attests this process, runs the agent to completion and records its exit.
/// Returns the status this daemon should exit with.
pub fn run(config: &DaemonConfig, stream: &FileStream, invocation: &AgentInvocation) -> Result<i32> {
    let pid = std::process::id();
    let session_id = config.session_id.as_str();

    // Nothing is launched until the attestation is durable.
    stream.append(
        session_id,
        &SessionStreamEvent::DaemonStarted(DaemonStartedEvent::new(
            session_id,
            pid,
            config.daemon_nonce.clone(),
            Some(config.agent_type),
        )),
    )?;
    info!(pid, agent = %config.agent_type, "Daemon attested");

    let mut command = invocation.command();
    command
        .current_dir(&config.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            record_exit(stream, session_id, pid, Some(SPAWN_FAILED_CODE), None);
            return Err(DaemonError::AgentSpawn {
                program: invocation.program.clone(),
                source,
            });
        }
    };
    let agent_pid = child.id();
    info!(agent_pid, program = %invocation.program.display(), "Agent started");

    let mut pumps = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        pumps.push(pump(stream.clone(), session_id, OutputStream::Stdout, stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(pump(stream.clone(), session_id, OutputStream::Stderr, stderr));
    }

    let status = {
        let _relay = Relay::start(agent_pid);
        child.wait().map_err(DaemonError::AgentWait)?
    };
    for handle in pumps {
        let _ = handle.join();
    }

    let (exit_code, signal) = describe(status);
    info!(agent_pid, ?exit_code, ?signal, "Agent exited");
    record_exit(stream, session_id, pid, exit_code, signal);

    Ok(daemon_exit_code(exit_code, signal))
}

fn pump<R>(stream: FileStream, session_id: &str, which: OutputStream, reader: R) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    let session_id = session_id.to_string();
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match read_capped_line(&mut reader, &mut buf, MAX_LINE_BYTES) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    let event = SessionStreamEvent::AgentOutput(AgentOutputEvent::new(
                        session_id.as_str(),
                        which,
                        line,
                    ));
                    if let Err(err) = stream.append(&session_id, &event) {
                        warn!(error = %err, "Failed to append agent output");
                    }
                }
                Err(err) => {
                    debug!(error = %err, "Agent output closed");
                    break;
                }
            }
        }
    })
}

/// Reads up to the next newline or `cap` bytes, whichever comes first.
fn read_capped_line<R: BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    cap: usize,
) -> io::Result<usize> {
    reader.take(cap as u64).read_until(b'\n', buf)
}

fn record_exit(
    stream: &FileStream,
    session_id: &str,
    pid: u32,
    exit_code: Option<i32>,
    signal: Option<i32>,
) {
    let event = SessionStreamEvent::DaemonExited(DaemonExitedEvent::new(
        session_id, pid, exit_code, signal,
    ));
    if let Err(err) = stream.append(session_id, &event) {
        warn!(error = %err, "Failed to record daemon exit");
    }
}

fn describe(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        (status.code(), status.signal())
    }
    #[cfg(not(unix))]
    {
        (status.code(), None)
    }
}

fn daemon_exit_code(exit_code: Option<i32>, signal: Option<i32>) -> i32 {
    match (exit_code, signal) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_protocol::{AgentType, SessionStream};
    use std::ffi::OsString;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn shell(script: &str) -> AgentInvocation {
        AgentInvocation {
            program: PathBuf::from("sh"),
            args: vec![OsString::from("-c"), OsString::from(script)],
        }
    }

    fn config(dir: &std::path::Path) -> DaemonConfig {
        DaemonConfig::new("s1", AgentType::Claude, "hello", dir).with_nonce("n1")
    }

    #[test]
    fn records_attestation_output_and_exit() {
        let temp = tempdir().unwrap();
        let stream = FileStream::open(&temp.path().join("streams").display().to_string()).unwrap();
        let config = config(temp.path());

        let code = run(&config, &stream, &shell("echo one; echo two >&2; exit 3")).unwrap();
        assert_eq!(code, 3);

        let events = stream.read_session("s1").unwrap();
        match events.first() {
            Some(SessionStreamEvent::DaemonStarted(started)) => {
                assert_eq!(started.pid, std::process::id());
                assert_eq!(started.daemon_nonce, "n1");
            }
            other => panic!("expected daemon_started first, got {:?}", other),
        }
        let mut lines: Vec<(OutputStream, String)> = events
            .iter()
            .filter_map(|event| match event {
                SessionStreamEvent::AgentOutput(output) => {
                    Some((output.stream, output.line.clone()))
                }
                _ => None,
            })
            .collect();
        lines.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            lines,
            vec![
                (OutputStream::Stdout, "one".to_string()),
                (OutputStream::Stderr, "two".to_string())
            ]
        );
        match events.last() {
            Some(SessionStreamEvent::DaemonExited(exited)) => {
                assert_eq!(exited.exit_code, Some(3));
                assert_eq!(exited.signal, None);
            }
            other => panic!("expected daemon_exited last, got {:?}", other),
        }
    }

    #[test]
    fn agent_runs_in_working_dir() {
        let temp = tempdir().unwrap();
        let stream = FileStream::open(&temp.path().join("streams").display().to_string()).unwrap();
        let workdir = temp.path().join("repo");
        std::fs::create_dir_all(&workdir).unwrap();

        run(&config(&workdir), &stream, &shell("pwd")).unwrap();

        let cwd = stream
            .read_session("s1")
            .unwrap()
            .into_iter()
            .find_map(|event| match event {
                SessionStreamEvent::AgentOutput(output) => Some(output.line),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            std::fs::canonicalize(cwd).unwrap(),
            std::fs::canonicalize(&workdir).unwrap()
        );
    }

    #[test]
    fn missing_program_still_records_exit() {
        let temp = tempdir().unwrap();
        let stream = FileStream::open(&temp.path().join("streams").display().to_string()).unwrap();
        let invocation = AgentInvocation {
            program: PathBuf::from("/nonexistent/agent-cli"),
            args: Vec::new(),
        };

        let err = run(&config(temp.path()), &stream, &invocation).unwrap_err();
        assert!(matches!(err, DaemonError::AgentSpawn { .. }));

        let events = stream.read_session("s1").unwrap();
        assert_eq!(events.len(), 2);
        match &events[1] {
            SessionStreamEvent::DaemonExited(exited) => {
                assert_eq!(exited.exit_code, Some(SPAWN_FAILED_CODE));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn long_lines_are_split_at_the_cap() {
        let input = format!("{}\nshort\n", "a".repeat(10));
        let mut reader = io::Cursor::new(input.into_bytes());
        let mut buf = Vec::new();
        let mut chunks = Vec::new();
        loop {
            buf.clear();
            if read_capped_line(&mut reader, &mut buf, 4).unwrap() == 0 {
                break;
            }
            chunks.push(String::from_utf8(buf.clone()).unwrap());
        }
        assert_eq!(chunks, vec!["aaaa", "aaaa", "aa\n", "shor", "t\n"]);
    }

    #[test]
    fn oversized_agent_line_is_spread_over_events() {
        let temp = tempdir().unwrap();
        let stream = FileStream::open(&temp.path().join("streams").display().to_string()).unwrap();
        let script = format!(
            "head -c {} /dev/zero | tr '\\0' x; echo",
            MAX_LINE_BYTES * 2 + 10
        );

        run(&config(temp.path()), &stream, &shell(&script)).unwrap();

        let lines: Vec<String> = stream
            .read_session("s1")
            .unwrap()
            .into_iter()
            .filter_map(|event| match event {
                SessionStreamEvent::AgentOutput(output) => Some(output.line),
                _ => None,
            })
            .collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|line| line.len() <= MAX_LINE_BYTES));
        assert_eq!(
            lines.iter().map(String::len).sum::<usize>(),
            MAX_LINE_BYTES * 2 + 10
        );
    }

    #[test]
    fn signal_exit_maps_to_shell_convention() {
        assert_eq!(daemon_exit_code(Some(0), None), 0);
        assert_eq!(daemon_exit_code(None, Some(libc::SIGTERM)), 128 + libc::SIGTERM);
        assert_eq!(daemon_exit_code(None, None), 1);
    }
}
