//! Runs one command line through the host shell and folds the result into
//! a single response text.
//!
//! Uses `tokio::process::Command` with an optional timeout. Spawn failures,
//! non-zero exits and timeouts are all reported inside the text; callers
//! always get something to show the operator.

use rctl_core::protocol::STDERR_TAG;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Result of executing a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Stdout lines, then stderr lines tagged with [`STDERR_TAG`], trimmed.
    pub text: String,
    /// `None` if the process could not be spawned, timed out, or died by signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// Executes command lines via the platform shell (`sh -c` / `cmd.exe /C`).
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    timeout: Option<Duration>,
}

impl CommandExecutor {
    /// `None` waits for the child however long it takes.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub async fn execute(&self, line: &str) -> ExecOutput {
        let mut cmd = shell_command(line);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %line, "executing");

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(r) => r,
                Err(_) => {
                    warn!(command = %line, timeout_secs = limit.as_secs_f64(), "command timed out");
                    return ExecOutput {
                        text: format!("{STDERR_TAG}command timed out after {}s and was killed", limit.as_secs_f64()),
                        exit_code: None,
                        timed_out: true,
                    };
                }
            },
            None => cmd.output().await,
        };

        let output = match result {
            Ok(o) => o,
            Err(e) => {
                warn!(command = %line, error = %e, "failed to spawn command");
                return ExecOutput {
                    text: format!("{STDERR_TAG}execution failed: {e}"),
                    exit_code: None,
                    timed_out: false,
                };
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code();

        let mut text = combine(&stdout, &stderr);
        if text.is_empty() && !output.status.success() {
            text = match exit_code {
                Some(code) => format!("{STDERR_TAG}exit status {code}"),
                None => format!("{STDERR_TAG}terminated by signal"),
            };
        }

        ExecOutput {
            text,
            exit_code,
            timed_out: false,
        }
    }
}

/// Stdout lines first, then each stderr line tagged.
fn combine(stdout: &str, stderr: &str) -> String {
    let mut text = String::with_capacity(stdout.len() + stderr.len());
    for line in stdout.lines() {
        text.push_str(line);
        text.push('\n');
    }
    for line in stderr.lines() {
        text.push_str(STDERR_TAG);
        text.push_str(line);
        text.push('\n');
    }
    text.trim().to_string()
}

#[cfg(not(windows))]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.arg("/C").arg(line);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_tags_stderr_after_stdout() {
        assert_eq!(combine("a\nb\n", "oops\n"), "a\nb\nERROR: oops");
        assert_eq!(combine("", ""), "");
        assert_eq!(combine("  padded  \n", ""), "padded");
    }

    #[tokio::test]
    async fn echo_hello() {
        let out = CommandExecutor::default().execute("echo hello").await;
        assert!(out.text.contains("hello"), "{:?}", out.text);
        assert_eq!(out.exit_code, Some(0));
        assert!(!out.timed_out);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_lines_are_tagged() {
        let out = CommandExecutor::default()
            .execute("echo visible; echo broken 1>&2; exit 3")
            .await;
        let lines: Vec<&str> = out.text.lines().collect();
        assert_eq!(lines, vec!["visible", "ERROR: broken"]);
        assert_eq!(out.exit_code, Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unknown_command_is_folded_into_text() {
        let out = CommandExecutor::default()
            .execute("definitely-not-a-command-rctl")
            .await;
        assert!(out.text.starts_with(STDERR_TAG), "{:?}", out.text);
        assert_ne!(out.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_failure_reports_status() {
        let out = CommandExecutor::default().execute("exit 4").await;
        assert_eq!(out.text, "ERROR: exit status 4");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_line_is_executed() {
        let out = CommandExecutor::default().execute("").await;
        assert_eq!(out.text, "");
        assert_eq!(out.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_hung_command() {
        let exec = CommandExecutor::new(Some(Duration::from_millis(200)));
        let started = std::time::Instant::now();
        let out = exec.execute("sleep 10").await;
        assert!(out.timed_out);
        assert!(out.text.contains("timed out"));
        assert_eq!(out.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
