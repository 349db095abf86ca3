//! Local process spawning with a timeout and line streaming.

use crate::error::{Error, Result};
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Both streams interleaved in arrival order.
    pub combined: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Synchronous spawn-with-timeout. `on_line` sees every output line as it
/// arrives, without its trailing newline.
pub trait ProcessRunner: Send + Sync {
    fn run(
        &self,
        command: &str,
        timeout: Option<Duration>,
        on_line: &mut dyn FnMut(StreamKind, &str),
    ) -> Result<ProcessOutput>;
}

/// Runs commands through `sh -c` (`cmd /C` on Windows).
#[derive(Debug, Default, Clone)]
pub struct ShellProcess {
    current_dir: Option<String>,
    env: Vec<(String, String)>,
}

impl ShellProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_dir(mut self, dir: impl Into<String>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn command(&self, command: &str) -> Command {
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        };

        #[cfg(not(windows))]
        let mut cmd = {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        };

        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl ProcessRunner for ShellProcess {
    fn run(
        &self,
        command: &str,
        timeout: Option<Duration>,
        on_line: &mut dyn FnMut(StreamKind, &str),
    ) -> Result<ProcessOutput> {
        let mut child = self.command(command).spawn().map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("spawn '{}'", command)))
        })?;

        let (tx, rx) = mpsc::channel::<(StreamKind, String)>();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, StreamKind::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, StreamKind::Stderr, tx.clone());
        }
        drop(tx);

        // A deadline past what `Instant` can represent is no deadline.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut output = ProcessOutput::default();

        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok((kind, line)) => {
                    on_line(kind, line.trim_end_matches(['\n', '\r']));
                    match kind {
                        StreamKind::Stdout => output.stdout.push_str(&line),
                        StreamKind::Stderr => output.stderr.push_str(&line),
                    }
                    output.combined.push_str(&line);
                }
                Err(RecvTimeoutError::Timeout) => {}
                // Both pipes closed: the process is done writing.
                Err(RecvTimeoutError::Disconnected) => {
                    let status = child.wait().map_err(|e| {
                        Error::internal_io(e.to_string(), Some("wait for child".to_string()))
                    })?;
                    output.exit_code = status.code().unwrap_or(-1);
                    return Ok(output);
                }
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                // Kill errors mean the child already exited; the wait reaps it either way.
                let _ = child.kill();
                let _ = child.wait();
                output.timed_out = true;
                output.exit_code = -1;
                return Ok(output);
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    source: R,
    kind: StreamKind,
    tx: mpsc::Sender<(StreamKind, String)>,
) {
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).to_string();
                    if tx.send((kind, line)).is_err() {
                        break;
                    }
                }
            }
        }
    });
}
