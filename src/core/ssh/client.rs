use super::RemoteShell;
use crate::environment::ConnectionParams;
use crate::error::{Error, Result};
use crate::utils::shell;
use std::path::PathBuf;
use std::process::Command;

/// `RemoteShell` backed by the system `ssh` binary.
///
/// `connect` starts a multiplexed master connection (on unix) so every
/// `exec` for the scope reuses one authenticated session; `disconnect`
/// asks the master to exit.
pub struct SshClient {
    target: Option<SshTarget>,
    control_dir: PathBuf,
    last: CommandOutput,
}

struct SshTarget {
    host: String,
    destination: String,
    port: u16,
    identity_file: Option<String>,
    connect_timeout: u64,
    options: Vec<String>,
    /// When true, all commands run locally instead of over SSH.
    /// Set automatically when the host is localhost/127.0.0.1/::1.
    is_local: bool,
}

#[derive(Debug, Clone, Default)]
struct CommandOutput {
    stdout: String,
    stderr: String,
    success: bool,
    exit_code: i32,
}

impl SshClient {
    pub fn new() -> Self {
        Self {
            target: None,
            control_dir: std::env::temp_dir(),
            last: CommandOutput::default(),
        }
    }

    /// Directory holding the multiplexing control sockets.
    pub fn with_control_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.control_dir = dir.into();
        self
    }

    fn control_path(&self) -> String {
        self.control_dir
            .join("hostrun-%C")
            .to_string_lossy()
            .to_string()
    }

    fn build_ssh_args(&self, target: &SshTarget, command: Option<&str>) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &target.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        if target.port != 22 {
            args.push("-p".to_string());
            args.push(target.port.to_string());
        }

        // Never prompt: a hung password prompt would stall the whole host loop.
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", target.connect_timeout),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);

        if cfg!(unix) {
            args.extend([
                "-o".to_string(),
                "ControlMaster=auto".to_string(),
                "-o".to_string(),
                format!("ControlPath={}", self.control_path()),
                "-o".to_string(),
                "ControlPersist=60".to_string(),
            ]);
        }

        for option in &target.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }

        args.push(target.destination.clone());

        if let Some(cmd) = command {
            args.push(cmd.to_string());
        }

        args
    }

    fn execute(&mut self, command: &str) -> bool {
        let output = match &self.target {
            Some(target) => self.execute_with_retry(target, command, 3),
            None => CommandOutput {
                stderr: "Not connected".to_string(),
                exit_code: -1,
                ..Default::default()
            },
        };
        let success = output.success;
        self.last = output;
        success
    }

    fn execute_with_retry(
        &self,
        target: &SshTarget,
        command: &str,
        max_attempts: u32,
    ) -> CommandOutput {
        let backoff_secs = [0, 2, 5]; // delays before retry 1, 2, 3

        for attempt in 0..max_attempts {
            let result = self.execute_once(target, command);

            // Only retry on transient connection errors, not command failures
            if result.success || attempt + 1 >= max_attempts || !is_transient_ssh_error(&result) {
                return result;
            }

            let delay = backoff_secs.get(attempt as usize + 1).copied().unwrap_or(5);
            log_status!(
                "ssh",
                "Connection to {} failed (attempt {}/{}), retrying in {}s...",
                target.host,
                attempt + 1,
                max_attempts,
                delay
            );
            std::thread::sleep(std::time::Duration::from_secs(delay));
        }

        CommandOutput {
            stderr: "SSH retry exhausted".to_string(),
            exit_code: -1,
            ..Default::default()
        }
    }

    fn execute_once(&self, target: &SshTarget, command: &str) -> CommandOutput {
        if target.is_local {
            return execute_local_command(command);
        }

        let args = self.build_ssh_args(target, Some(command));
        capture(Command::new("ssh").args(&args))
    }
}

impl Default for SshClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteShell for SshClient {
    fn connect(&mut self, host: &str, params: &ConnectionParams) -> Result<()> {
        let identity_file = match params.expanded_identity_file() {
            Some(path) => {
                if !std::path::Path::new(&path).exists() {
                    return Err(Error::config_invalid_value(
                        "ssh_params.identity_file",
                        Some(path),
                        "SSH identity file not found",
                    ));
                }
                Some(path)
            }
            None => None,
        };

        let is_local = is_local_host(host);
        if is_local {
            log_status!("ssh", "Host '{}' is localhost, using local execution", host);
        }

        let target = SshTarget {
            host: host.to_string(),
            destination: params.destination(host),
            port: params.port,
            identity_file,
            connect_timeout: params.connect_timeout,
            options: params.options.clone(),
            is_local,
        };

        // Probe once so authentication problems surface at connect time
        // rather than on the first task command.
        let probe = self.execute_with_retry(&target, "true", 3);
        if !probe.success {
            let cause = if probe.stderr.trim().is_empty() {
                format!("ssh exited with status {}", probe.exit_code)
            } else {
                probe.stderr.trim().to_string()
            };
            self.last = probe;
            return Err(Error::connection_failed(host, cause));
        }

        self.target = Some(target);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        let Some(target) = self.target.take() else {
            return Ok(());
        };

        if target.is_local || !cfg!(unix) {
            return Ok(());
        }

        let output = capture(Command::new("ssh").args([
            "-o".to_string(),
            format!("ControlPath={}", self.control_path()),
            "-O".to_string(),
            "exit".to_string(),
            target.destination.clone(),
        ]));

        // No master running is fine: ControlPersist may already have expired.
        if !output.success && !output.stderr.contains("No such file") {
            log_status!("ssh", "Closing session to {}: {}", target.host, output.stderr.trim());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.target.is_some()
    }

    fn exec(&mut self, command: &str) -> bool {
        self.execute(command)
    }

    fn sudo_exec(&mut self, command: &str) -> bool {
        let elevated = format!("sudo -n sh -c {}", shell::escape_command_for_shell(command));
        self.execute(&elevated)
    }

    fn last_output(&self) -> &str {
        &self.last.stdout
    }

    fn last_error(&self) -> &str {
        &self.last.stderr
    }
}

fn execute_local_command(command: &str) -> CommandOutput {
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

    capture(&mut cmd)
}

fn capture(cmd: &mut Command) -> CommandOutput {
    match cmd.output() {
        Ok(out) => CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        },
        Err(e) => CommandOutput {
            stdout: String::new(),
            stderr: format!("SSH error: {}", e),
            success: false,
            exit_code: -1,
        },
    }
}

/// Check if a host address refers to the local machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

/// Check if an SSH failure is a transient connection error worth retrying.
fn is_transient_ssh_error(output: &CommandOutput) -> bool {
    let stderr = output.stderr.to_lowercase();
    // SSH exit code 255 = connection error (not a remote command failure)
    let is_connection_exit = output.exit_code == 255;

    let transient_patterns = [
        "connection refused",
        "connection reset",
        "connection timed out",
        "no route to host",
        "network is unreachable",
        "temporary failure in name resolution",
        "broken pipe",
        "ssh_exchange_identification",
        "connection closed by remote host",
    ];

    // Authentication failures also exit 255 but will not fix themselves.
    if stderr.contains("permission denied") || stderr.contains("host key verification failed") {
        return false;
    }

    is_connection_exit || transient_patterns.iter().any(|p| stderr.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(stderr: &str, exit_code: i32) -> CommandOutput {
        CommandOutput {
            stderr: stderr.to_string(),
            exit_code,
            ..Default::default()
        }
    }

    #[test]
    fn localhost_aliases_are_local() {
        assert!(is_local_host("localhost"));
        assert!(is_local_host("127.0.0.1"));
        assert!(is_local_host("::1"));
        assert!(!is_local_host("web1.example.com"));
    }

    #[test]
    fn transient_errors_are_retried() {
        assert!(is_transient_ssh_error(&output("ssh: connect to host x port 22: Connection refused", 255)));
        assert!(is_transient_ssh_error(&output("", 255)));
        assert!(!is_transient_ssh_error(&output("ls: cannot access", 2)));
    }

    #[test]
    fn auth_failures_are_not_retried() {
        assert!(!is_transient_ssh_error(&output(
            "deploy@web1: Permission denied (publickey).",
            255
        )));
    }

    #[test]
    fn ssh_args_carry_port_identity_and_options() {
        let client = SshClient::new().with_control_dir("/tmp/ctl");
        let target = SshTarget {
            host: "web1".to_string(),
            destination: "deploy@web1".to_string(),
            port: 2222,
            identity_file: Some("/keys/id".to_string()),
            connect_timeout: 5,
            options: vec!["StrictHostKeyChecking=no".to_string()],
            is_local: false,
        };

        let args = client.build_ssh_args(&target, Some("uptime"));
        assert_eq!(&args[..4], &["-i", "/keys/id", "-p", "2222"]);
        assert!(args.contains(&"ConnectTimeout=5".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert_eq!(args[args.len() - 2], "deploy@web1");
        assert_eq!(args[args.len() - 1], "uptime");
    }

    #[test]
    fn exec_without_connection_fails() {
        let mut client = SshClient::new();
        assert!(!client.is_connected());
        assert!(!client.exec("uptime"));
        assert_eq!(client.last_error(), "Not connected");
    }

    #[cfg(unix)]
    #[test]
    fn localhost_runs_commands_locally() {
        let mut client = SshClient::new();
        client
            .connect("localhost", &ConnectionParams::default())
            .unwrap();
        assert!(client.is_connected());
        assert!(client.exec("echo hello"));
        assert_eq!(client.last_output().trim(), "hello");
        assert!(!client.exec("echo oops >&2; exit 4"));
        assert_eq!(client.last_error().trim(), "oops");
        client.disconnect().unwrap();
        assert!(!client.is_connected());
    }
}
