// Command execution for one scope - local processes and remote commands
//
// Every call echoes a trace line before doing anything:
//   Local: <cmd> / Remote: <cmd> / Sudo: <cmd>
// prefixed with "[dry-run] " when nothing will actually run. Dry runs never
// reach the process runner or the transport.

use crate::connection::ConnectionManager;
use crate::error::{Error, LocalCommandFailedDetails, LocalTimeoutDetails, Result};
use crate::process::{ProcessRunner, StreamKind};
use crate::sink::OutputSink;
use std::time::Duration;

pub struct CommandExecutor<'a> {
    connection: &'a mut ConnectionManager,
    process: &'a dyn ProcessRunner,
    sink: &'a dyn OutputSink,
    transcript: String,
}

impl<'a> CommandExecutor<'a> {
    pub fn new(
        connection: &'a mut ConnectionManager,
        process: &'a dyn ProcessRunner,
        sink: &'a dyn OutputSink,
    ) -> Self {
        Self {
            connection,
            process,
            sink,
            transcript: String::new(),
        }
    }

    /// Output captured from every command run so far, in order.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn into_transcript(self) -> String {
        self.transcript
    }

    pub fn sink(&self) -> &dyn OutputSink {
        self.sink
    }

    pub fn connection(&self) -> &ConnectionManager {
        self.connection
    }

    fn trace(&self, kind: &str, command: &str, dry_run: bool) {
        let prefix = if dry_run { "[dry-run] " } else { "" };
        self.sink.info(&format!("{}{}: {}", prefix, kind, command));
    }

    /// Run `command` locally. Returns captured stdout, or the literal
    /// command in dry-run mode.
    pub fn run_local(
        &mut self,
        command: &str,
        dry_run: bool,
        timeout: Option<Duration>,
    ) -> Result<String> {
        self.trace("Local", command, dry_run);
        if dry_run {
            return Ok(command.to_string());
        }

        let sink = self.sink;
        let output = self
            .process
            .run(command, timeout, &mut |kind, line| match kind {
                StreamKind::Stdout => sink.info(line),
                StreamKind::Stderr => sink.error(line),
            })?;
        self.transcript.push_str(&output.combined);

        if output.timed_out {
            let err = Error::local_timeout(LocalTimeoutDetails {
                command: command.to_string(),
                timeout_secs: timeout.map(|t| t.as_secs_f64()).unwrap_or_default(),
                captured_output: output.combined,
            });
            self.sink.error(&err.message);
            return Err(err);
        }

        if output.exit_code != 0 {
            let err = Error::local_command_failed(LocalCommandFailedDetails {
                command: command.to_string(),
                exit_code: output.exit_code,
                captured_output: output.combined,
            });
            self.sink.error(&format!("{}: {}", err.message, command));
            return Err(err);
        }

        Ok(output.stdout)
    }

    /// Run `command` on the connected host.
    pub fn run_remote(&mut self, command: &str, dry_run: bool) -> Result<String> {
        self.remote(command, dry_run, false)
    }

    /// Run `command` on the connected host with elevated privileges.
    pub fn run_sudo(&mut self, command: &str, dry_run: bool) -> Result<String> {
        self.remote(command, dry_run, true)
    }

    fn remote(&mut self, command: &str, dry_run: bool, sudo: bool) -> Result<String> {
        if !self.connection.is_connected() {
            return Err(Error::no_active_connection());
        }

        self.trace(if sudo { "Sudo" } else { "Remote" }, command, dry_run);
        if dry_run {
            return Ok(command.to_string());
        }

        let result = if sudo {
            self.connection.sudo(command)
        } else {
            self.connection.exec(command)
        };

        match result {
            Ok(output) => {
                for line in output.lines() {
                    self.sink.info(line);
                }
                self.transcript.push_str(&output);
                Ok(output)
            }
            Err(err) => {
                if let Some(captured) = err.captured_output() {
                    self.transcript.push_str(captured);
                    for line in captured.lines() {
                        self.sink.info(line);
                    }
                }
                self.sink.error(&err.message);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::ConnectionParams;
    use crate::error::ErrorCode;
    use crate::process::ProcessOutput;
    use crate::sink::{MemorySink, Severity};
    use crate::ssh::RemoteShell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts spawns and replays a canned output.
    struct CannedProcess {
        spawns: AtomicUsize,
        output: ProcessOutput,
    }

    impl CannedProcess {
        fn new(output: ProcessOutput) -> Self {
            Self {
                spawns: AtomicUsize::new(0),
                output,
            }
        }
    }

    impl ProcessRunner for CannedProcess {
        fn run(
            &self,
            _command: &str,
            _timeout: Option<Duration>,
            on_line: &mut dyn FnMut(StreamKind, &str),
        ) -> Result<ProcessOutput> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            for line in self.output.combined.lines() {
                on_line(StreamKind::Stdout, line);
            }
            Ok(self.output.clone())
        }
    }

    struct CountingShell {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl RemoteShell for CountingShell {
        fn connect(&mut self, _host: &str, _params: &ConnectionParams) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn exec(&mut self, _command: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            !self.fail
        }
        fn sudo_exec(&mut self, _command: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            !self.fail
        }
        fn last_output(&self) -> &str {
            "line one\nline two\n"
        }
        fn last_error(&self) -> &str {
            "permission denied"
        }
    }

    fn connection(fail: bool) -> (ConnectionManager, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = ConnectionManager::new(Box::new(CountingShell {
            calls: calls.clone(),
            fail,
        }));
        (manager, calls)
    }

    #[test]
    fn dry_run_local_returns_command_without_spawning() {
        let (mut conn, _) = connection(false);
        let process = CannedProcess::new(ProcessOutput::default());
        let sink = MemorySink::new();
        let mut executor = CommandExecutor::new(&mut conn, &process, &sink);

        let out = executor
            .run_local("exit 1", true, Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(out, "exit 1");
        assert_eq!(process.spawns.load(Ordering::SeqCst), 0);
        assert_eq!(sink.messages(Severity::Info), vec!["[dry-run] Local: exit 1"]);
    }

    #[test]
    fn local_failure_carries_exit_code_and_output() {
        let (mut conn, _) = connection(false);
        let process = CannedProcess::new(ProcessOutput {
            stdout: String::new(),
            stderr: "nope\n".to_string(),
            combined: "nope\n".to_string(),
            exit_code: 1,
            timed_out: false,
        });
        let sink = MemorySink::new();
        let mut executor = CommandExecutor::new(&mut conn, &process, &sink);

        let err = executor.run_local("exit 1", false, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::LocalCommandFailed);
        assert_eq!(err.exit_code(), Some(1));
        assert_eq!(err.captured_output(), Some("nope\n"));
        assert_eq!(executor.transcript(), "nope\n");
        assert!(sink.contains("Local command fail (exit 1)"));
    }

    #[test]
    fn local_timeout_is_reported() {
        let (mut conn, _) = connection(false);
        let process = CannedProcess::new(ProcessOutput {
            timed_out: true,
            exit_code: -1,
            ..Default::default()
        });
        let sink = MemorySink::new();
        let mut executor = CommandExecutor::new(&mut conn, &process, &sink);

        let err = executor
            .run_local("sleep 10", false, Some(Duration::from_secs(2)))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::LocalTimeout);
        assert_eq!(err.details["timeoutSecs"], 2.0);
    }

    #[test]
    fn remote_requires_connection_even_in_dry_run() {
        let (mut conn, calls) = connection(false);
        let process = CannedProcess::new(ProcessOutput::default());
        let sink = MemorySink::new();
        let mut executor = CommandExecutor::new(&mut conn, &process, &sink);

        let err = executor.run_remote("uptime", true).unwrap_err();
        assert_eq!(err.code, ErrorCode::NoActiveConnection);
        let err = executor.run_sudo("uptime", false).unwrap_err();
        assert_eq!(err.code, ErrorCode::NoActiveConnection);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dry_run_remote_and_sudo_never_touch_transport() {
        let (mut conn, calls) = connection(false);
        conn.open("web1", &ConnectionParams::default()).unwrap();
        let connects = calls.load(Ordering::SeqCst);
        let process = CannedProcess::new(ProcessOutput::default());
        let sink = MemorySink::new();
        let mut executor = CommandExecutor::new(&mut conn, &process, &sink);

        assert_eq!(executor.run_remote("uptime", true).unwrap(), "uptime");
        assert_eq!(executor.run_sudo("reboot", true).unwrap(), "reboot");
        assert_eq!(calls.load(Ordering::SeqCst), connects);
        assert_eq!(
            sink.messages(Severity::Info),
            vec!["[dry-run] Remote: uptime", "[dry-run] Sudo: reboot"]
        );
    }

    #[test]
    fn remote_output_is_echoed_and_captured() {
        let (mut conn, _) = connection(false);
        conn.open("web1", &ConnectionParams::default()).unwrap();
        let process = CannedProcess::new(ProcessOutput::default());
        let sink = MemorySink::new();
        let mut executor = CommandExecutor::new(&mut conn, &process, &sink);

        let out = executor.run_remote("ls", false).unwrap();
        assert_eq!(out, "line one\nline two\n");
        assert_eq!(
            sink.messages(Severity::Info),
            vec!["Remote: ls", "line one", "line two"]
        );
        assert_eq!(executor.into_transcript(), "line one\nline two\n");
    }

    #[test]
    fn remote_failure_prints_last_error() {
        let (mut conn, _) = connection(true);
        conn.open("web1", &ConnectionParams::default()).unwrap();
        let process = CannedProcess::new(ProcessOutput::default());
        let sink = MemorySink::new();
        let mut executor = CommandExecutor::new(&mut conn, &process, &sink);

        let err = executor.run_sudo("apt-get upgrade", false).unwrap_err();
        assert_eq!(err.code, ErrorCode::RemoteCommandFailed);
        assert_eq!(err.details["sudo"], true);
        assert_eq!(
            sink.messages(Severity::Error),
            vec!["Remote command fail: permission denied"]
        );
    }
}
