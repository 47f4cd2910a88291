//! Batch scheduler integration
//!
//! Jobs are submitted to Slurm through its command-line tools; there is no
//! daemon API on the clusters the models run on. The client wraps the three
//! binaries (submission, queue query, cancellation) resolved from the PATH
//! at construction time, and drives them through [`ShellRunner`].
//!
//! Following a job is a poll loop: while the job id is present in the queue
//! listing, the tail of the scheduler's stdout sentinel file is forwarded to
//! the log, with a duplicate-suppression window wide enough to absorb the
//! overlap between consecutive tails. The loop runs in-process, so the
//! overall timeout and the cancellation path behave like every other
//! timeboxed call in the crate.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ModelOpsConfig;
use crate::error::{Error, Result};
use crate::process::ShellRunner;

/// File the scheduler writes the job's stdout into
pub const STDOUT_FILE: &str = "stdout.modelops";
/// File the scheduler writes the job's stderr into
pub const STDERR_FILE: &str = "stderr.modelops";

/// Pattern matched against the first line of a successful submission
const SUBMISSION_PATTERN: &str = r"Submitted batch job ([0-9]+)";

/// Client for the Slurm command-line tools
#[derive(Debug, Clone)]
pub struct SlurmClient {
    sbatch: PathBuf,
    squeue: PathBuf,
    scancel: PathBuf,
    poll_interval: Duration,
    tail_lines: usize,
    follow_dedup_window: usize,
    command_timeout: Duration,
}

impl SlurmClient {
    /// Resolves the configured scheduler binaries on the PATH
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when a binary cannot be found.
    pub fn new(config: &ModelOpsConfig) -> Result<Self> {
        let resolve = |name: &str| {
            which::which(name).map_err(|e| {
                Error::Configuration(format!("Scheduler binary '{}' not found: {}", name, e))
            })
        };
        Ok(Self::with_binaries(
            resolve(&config.sbatch_bin)?,
            resolve(&config.squeue_bin)?,
            resolve(&config.scancel_bin)?,
            config,
        ))
    }

    /// Builds a client around already-resolved binary paths
    pub fn with_binaries(
        sbatch: PathBuf,
        squeue: PathBuf,
        scancel: PathBuf,
        config: &ModelOpsConfig,
    ) -> Self {
        Self {
            sbatch,
            squeue,
            scancel,
            poll_interval: config.poll_interval(),
            tail_lines: config.tail_lines,
            follow_dedup_window: config.follow_dedup_window,
            command_timeout: config.command_timeout(),
        }
    }

    /// Submits a job script to the scheduler from `workdir`
    ///
    /// The job is named after the working directory and its sentinel files
    /// land there. Returns the job id parsed from the submission output, or
    /// `None` when the submission tool itself failed; callers decide whether
    /// an absent job id is fatal for their stage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExternalTool`] when the submission tool reports
    /// success but its output does not carry a job id.
    pub async fn submit(
        &self,
        queue: &str,
        core_count: u32,
        job_script: &Path,
        workdir: &Path,
    ) -> Result<Option<String>> {
        let command = format!(
            "{} --partition={} --contiguous --job-name=`basename $PWD` \
             --output={} --error={} --cpus-per-task=1 --ntasks {} {} {} 2>&1",
            self.sbatch.display(),
            queue,
            STDOUT_FILE,
            STDERR_FILE,
            core_count,
            job_script.display(),
            core_count,
        );
        let output = ShellRunner::new(self.command_timeout)
            .with_workdir(workdir)
            .run(&command)
            .await?;

        if !output.success() {
            warn!(exit_code = ?output.exit_code, "Job submission failed");
            return Ok(None);
        }

        let first_line = output.first_line().unwrap_or_default();
        let regex = Regex::new(SUBMISSION_PATTERN).unwrap();
        let job_id = regex
            .captures(first_line)
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str().to_string())
            .ok_or_else(|| Error::ExternalTool {
                tool: "sbatch".to_string(),
                message: format!("Could not parse submission output: '{}'", first_line),
            })?;

        info!(job_id, queue, core_count, "Job submitted");
        Ok(Some(job_id))
    }

    /// Follows a submitted job until it leaves the queue
    ///
    /// Polls the queue listing at the configured interval. While the job is
    /// present, the tail of the stdout sentinel in `workdir` is forwarded to
    /// the log; before the sentinel appears, the scheduler's own view of the
    /// job is forwarded instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when the job is still queued or running
    /// when `timeout` elapses.
    pub async fn follow(&self, job_id: &str, workdir: &Path, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut recent: VecDeque<String> = VecDeque::new();

        info!(job_id, "Following job");
        loop {
            if !self.job_in_queue(job_id).await? {
                break;
            }

            let sentinel = workdir.join(STDOUT_FILE);
            if sentinel.is_file() {
                for line in tail_lines(&sentinel, self.tail_lines)? {
                    self.forward_deduped(&mut recent, &line);
                }
            } else {
                let command = format!("{} -a -j {} 2>&1", self.squeue.display(), job_id);
                let output = ShellRunner::new(self.command_timeout)
                    .with_forwarding(false)
                    .run(&command)
                    .await?;
                for line in output.lines {
                    self.forward_deduped(&mut recent, &line);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout {
                    seconds: timeout.as_secs(),
                    context: format!("Following job {}", job_id),
                });
            }
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }

        info!(job_id, "Job left the queue");
        Ok(())
    }

    /// Requests cancellation of a job
    pub async fn cancel(&self, job_id: &str) -> Result<()> {
        let command = format!("{} {} 2>&1", self.scancel.display(), job_id);
        let output = ShellRunner::new(self.command_timeout).run(&command).await?;
        if !output.success() {
            return Err(Error::ExternalTool {
                tool: "scancel".to_string(),
                message: format!(
                    "Cancellation of job {} exited with {:?}",
                    job_id, output.exit_code
                ),
            });
        }
        info!(job_id, "Cancellation requested");
        Ok(())
    }

    /// Waits until a cancelled job has left the queue
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when the job is still listed after
    /// `timeout`.
    pub async fn wait_cancelled(&self, job_id: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while self.job_in_queue(job_id).await? {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout {
                    seconds: timeout.as_secs(),
                    context: format!("Waiting for job {} to be cancelled", job_id),
                });
            }
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
        info!(job_id, "Job cancelled");
        Ok(())
    }

    async fn job_in_queue(&self, job_id: &str) -> Result<bool> {
        let command = format!("{} 2>&1", self.squeue.display());
        let output = ShellRunner::new(self.command_timeout)
            .with_forwarding(false)
            .run(&command)
            .await?;
        Ok(output.lines.iter().any(|line| line.contains(job_id)))
    }

    fn forward_deduped(&self, recent: &mut VecDeque<String>, line: &str) {
        if !recent.iter().any(|seen| seen == line) {
            info!("{}", line);
        }
        recent.push_back(line.to_string());
        while recent.len() > self.follow_dedup_window {
            recent.pop_front();
        }
    }
}

/// Last `count` lines of a text file
fn tail_lines(path: &Path, count: usize) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(count);
    debug!(file = %path.display(), total = lines.len(), "Tailing sentinel file");
    Ok(lines[start..].iter().map(|s| s.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    fn test_config() -> ModelOpsConfig {
        ModelOpsConfig {
            poll_interval_secs: 1,
            ..ModelOpsConfig::default()
        }
    }

    fn client(dir: &Path, sbatch: &str, squeue: &str, scancel: &str) -> SlurmClient {
        SlurmClient::with_binaries(
            write_stub(dir, "sbatch", sbatch),
            write_stub(dir, "squeue", squeue),
            write_stub(dir, "scancel", scancel),
            &test_config(),
        )
    }

    #[tokio::test]
    async fn test_submit_parses_job_id() {
        let dir = TempDir::new().unwrap();
        let client = client(dir.path(), "echo 'Submitted batch job 4242'", "true", "true");

        let job_id = client
            .submit("standard", 64, Path::new("jobs/decomp.sh"), dir.path())
            .await
            .unwrap();
        assert_eq!(job_id, Some("4242".to_string()));
    }

    #[tokio::test]
    async fn test_submit_failure_yields_no_job_id() {
        let dir = TempDir::new().unwrap();
        let client = client(dir.path(), "echo 'sbatch: error: queue full'; exit 1", "true", "true");

        let job_id = client
            .submit("standard", 64, Path::new("jobs/decomp.sh"), dir.path())
            .await
            .unwrap();
        assert_eq!(job_id, None);
    }

    #[tokio::test]
    async fn test_submit_unparsable_output_is_an_error() {
        let dir = TempDir::new().unwrap();
        let client = client(dir.path(), "echo 'something unexpected'", "true", "true");

        let result = client
            .submit("standard", 64, Path::new("jobs/decomp.sh"), dir.path())
            .await;
        assert!(matches!(result, Err(Error::ExternalTool { .. })));
    }

    #[tokio::test]
    async fn test_follow_completes_when_job_leaves_queue() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("polls");
        // Job is listed for the first two queue polls, then gone
        let squeue = format!(
            "count=$(cat {state} 2>/dev/null || echo 0); count=$((count+1)); \
             echo $count > {state}; \
             if [ $count -le 2 ]; then echo '4242 standard decomp-deck R'; fi",
            state = state.display()
        );
        let client = client(dir.path(), "true", &squeue, "true");
        std::fs::write(dir.path().join(STDOUT_FILE), "iter 1\niter 2\n").unwrap();

        client
            .follow("4242", dir.path(), Duration::from_secs(30))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_follow_times_out_while_job_is_queued() {
        let dir = TempDir::new().unwrap();
        let client = client(dir.path(), "true", "echo '4242 standard decomp-deck R'", "true");

        let result = client
            .follow("4242", dir.path(), Duration::from_millis(1500))
            .await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cancel_reports_tool_failure() {
        let dir = TempDir::new().unwrap();
        let client = client(dir.path(), "true", "true", "exit 1");

        let result = client.cancel("4242").await;
        assert!(matches!(result, Err(Error::ExternalTool { .. })));
    }

    #[tokio::test]
    async fn test_wait_cancelled_returns_once_job_is_gone() {
        let dir = TempDir::new().unwrap();
        let client = client(dir.path(), "true", "true", "true");

        client
            .wait_cancelled("4242", Duration::from_secs(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_cancelled_times_out() {
        let dir = TempDir::new().unwrap();
        let client = client(dir.path(), "true", "echo '4242 standard decomp-deck R'", "true");

        let result = client.wait_cancelled("4242", Duration::from_millis(1200)).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[test]
    fn test_tail_lines_returns_last_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STDOUT_FILE);
        std::fs::write(&path, "a\nb\nc\nd\n").unwrap();

        assert_eq!(tail_lines(&path, 2).unwrap(), vec!["c", "d"]);
        assert_eq!(tail_lines(&path, 10).unwrap(), vec!["a", "b", "c", "d"]);
    }
}
