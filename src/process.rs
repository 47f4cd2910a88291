//! Shell command execution with output capture
//!
//! Every external tool the orchestrator touches (scheduler binaries, model
//! runtimes, conversion utilities) is invoked through [`ShellRunner`]. The
//! runner captures a full line-by-line transcript of the merged output
//! streams, optionally forwarding new lines to the log as they arrive, and
//! enforces a hard timeout on the child process.
//!
//! Duplicate suppression only affects the forwarded log lines: solvers tend
//! to print the same progress line thousands of times, and the window keeps
//! the log readable without losing the transcript itself.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Result of a shell command execution
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code of the process, or `None` if it was killed on timeout
    /// or terminated by a signal
    pub exit_code: Option<i32>,

    /// Full transcript of the merged stdout/stderr streams, in arrival order
    pub lines: Vec<String>,
}

impl CommandOutput {
    /// True when the process completed with a zero exit code
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// First transcript line, if any
    pub fn first_line(&self) -> Option<&str> {
        self.lines.first().map(|s| s.as_str())
    }
}

/// Runs shell commands with a timeout and live output capture
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
    timeout: Duration,
    dedup_window: usize,
    forward_output: bool,
    workdir: Option<std::path::PathBuf>,
}

impl ShellRunner {
    /// Creates a runner with the given timeout, a duplicate-suppression
    /// window of one line, and live log forwarding enabled
    pub fn new(timeout: Duration) -> Self {
        Self {
            shell: "sh".to_string(),
            timeout,
            dedup_window: 1,
            forward_output: true,
            workdir: None,
        }
    }

    /// Overrides the shell binary used to interpret commands
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Runs the command in `dir` instead of the inherited working directory
    pub fn with_workdir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Sets the number of trailing transcript lines a new line is compared
    /// against before being forwarded to the log
    pub fn with_dedup_window(mut self, window: usize) -> Self {
        self.dedup_window = window.max(1);
        self
    }

    /// Enables or disables forwarding of output lines to the log
    pub fn with_forwarding(mut self, forward: bool) -> Self {
        self.forward_output = forward;
        self
    }

    /// Runs a command through the shell and captures its output
    ///
    /// The command runs in the configured working directory, or inherits the
    /// current one. Stdout and stderr are both captured into a single
    /// transcript. When the timeout elapses the process is killed and the
    /// partial transcript is returned with an absent exit code; a timeout is
    /// not an error at this level, callers decide what an unfinished command
    /// means.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the process cannot be spawned
    /// at all (missing shell, exhausted resources).
    pub async fn run(&self, command: &str) -> Result<CommandOutput> {
        debug!(command, timeout_secs = self.timeout.as_secs(), "Running shell command");

        let mut builder = Command::new(&self.shell);
        builder
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.workdir {
            builder.current_dir(dir);
        }
        let mut child = builder.spawn().map_err(|e| {
            Error::Configuration(format!("Failed to spawn command '{}': {}", command, e))
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let mut readers = Vec::new();

        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }));
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = tx.clone();
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let deadline = Instant::now() + self.timeout;
        let mut transcript: Vec<String> = Vec::new();
        let mut timed_out = false;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                timed_out = true;
                break;
            }
            match timeout(remaining, rx.recv()).await {
                Ok(Some(line)) => self.record_line(&mut transcript, line),
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            warn!(
                command,
                timeout_secs = self.timeout.as_secs(),
                "Command timed out, killing process"
            );
            let _ = child.kill().await;
            for reader in readers {
                reader.abort();
            }
            while let Ok(line) = rx.try_recv() {
                self.record_line(&mut transcript, line);
            }
            return Ok(CommandOutput {
                exit_code: None,
                lines: transcript,
            });
        }

        let status = child.wait().await?;
        for reader in readers {
            let _ = reader.await;
        }

        debug!(exit_code = ?status.code(), lines = transcript.len(), "Command finished");
        Ok(CommandOutput {
            exit_code: status.code(),
            lines: transcript,
        })
    }

    fn record_line(&self, transcript: &mut Vec<String>, line: String) {
        let line = line.trim_end().to_string();
        let window_start = transcript.len().saturating_sub(self.dedup_window);
        let is_duplicate = transcript[window_start..].iter().any(|l| l == &line);
        if !is_duplicate && self.forward_output {
            info!("{}", line);
        }
        transcript.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(secs: u64) -> ShellRunner {
        ShellRunner::new(Duration::from_secs(secs)).with_forwarding(false)
    }

    #[tokio::test]
    async fn test_captures_output_lines() {
        let output = runner(5).run("echo one && echo two").await.unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert!(output.success());
        assert_eq!(output.lines, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_captures_stderr() {
        let output = runner(5).run("echo oops >&2").await.unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.lines, vec!["oops"]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_code() {
        let output = runner(5).run("exit 3").await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_timeout_returns_partial_transcript() {
        let output = runner(1).run("echo started && sleep 30").await.unwrap();
        assert_eq!(output.exit_code, None);
        assert_eq!(output.lines, vec!["started"]);
    }

    #[tokio::test]
    async fn test_transcript_keeps_duplicate_lines() {
        // Duplicate suppression applies to forwarded log lines only
        let output = runner(5)
            .run("printf 'same\\nsame\\nsame\\n'")
            .await
            .unwrap();
        assert_eq!(output.lines, vec!["same", "same", "same"]);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_configuration_error() {
        let result = runner(5)
            .with_shell("definitely-not-a-shell-binary")
            .run("echo hi")
            .await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_first_line_helper() {
        let output = runner(5).run("echo head && echo tail").await.unwrap();
        assert_eq!(output.first_line(), Some("head"));
    }

    #[tokio::test]
    async fn test_runs_in_configured_workdir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("probe.txt"), "x").unwrap();

        let output = runner(5)
            .with_workdir(dir.path())
            .run("ls probe.txt")
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.lines, vec!["probe.txt"]);
    }
}
