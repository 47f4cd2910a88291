//! Configuration management for modelops
//!
//! This module provides the configuration system that loads settings from
//! environment variables with sensible defaults. Configuration includes the
//! storage endpoint, scheduler binaries, polling cadence, and the timeouts
//! applied to every external call.
//!
//! # Environment Variables
//!
//! ## Orchestrator Configuration
//! - `MODELOPS_STORAGE_URL`: Storage endpoint; scheme selects the backend
//!   (`file://` or `http[s]://`) - default: "file:///var/lib/modelops"
//! - `MODELOPS_LOG_LEVEL`: Logging level - default: "info"
//! - `MODELOPS_EXECUTABLE_DIR`: Directory where model executables are placed - default: "modelops-executables"
//! - `MODELOPS_JOB_SCRIPT_DIR`: Directory holding the per-model job scripts - default: "modelops-assets/jobs"
//!
//! ## Scheduler Configuration
//! - `MODELOPS_SBATCH_BIN`: Submission binary name or path - default: "sbatch"
//! - `MODELOPS_SQUEUE_BIN`: Queue query binary name or path - default: "squeue"
//! - `MODELOPS_SCANCEL_BIN`: Cancellation binary name or path - default: "scancel"
//! - `MODELOPS_POLL_INTERVAL`: Seconds between queue polls - default: "5"
//! - `MODELOPS_TAIL_LINES`: Sentinel lines echoed per poll while following - default: "10"
//! - `MODELOPS_FOLLOW_DEDUP_WINDOW`: Duplicate-suppression window while following - default: "50"
//!
//! ## Timeouts
//! - `MODELOPS_COMMAND_TIMEOUT`: Seconds allowed for ordinary shell commands - default: "300"
//! - `MODELOPS_JOB_TIMEOUT`: Seconds allowed for a scheduled model run - default: "172800" (48h)
//! - `MODELOPS_CANCEL_TIMEOUT`: Seconds to wait for a cancelled job to leave the queue - default: "3600"
//!
//! ## Hashing
//! - `MODELOPS_HASH_SIZE_LIMIT`: Per-file byte ceiling when hashing the
//!   working directory - default: "134217728" (128MB)
//!
//! ## Storage Credentials
//! Credentials for the remote storage backend are read directly from the
//! standard variables `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY` at the
//! point of use; they are never stored in the configuration structure.
//!
//! # Example
//!
//! ```no_run
//! use modelops::config::ModelOpsConfig;
//! use std::env;
//!
//! env::set_var("MODELOPS_STORAGE_URL", "file:///var/lib/modelops");
//!
//! // Load configuration from environment with defaults
//! let config = ModelOpsConfig::default();
//!
//! // Validate configuration
//! config.validate().expect("Invalid configuration");
//! ```

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default values for configuration
const DEFAULT_STORAGE_URL: &str = "file:///var/lib/modelops";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_EXECUTABLE_DIR: &str = "modelops-executables";
const DEFAULT_JOB_SCRIPT_DIR: &str = "modelops-assets/jobs";
const DEFAULT_SBATCH_BIN: &str = "sbatch";
const DEFAULT_SQUEUE_BIN: &str = "squeue";
const DEFAULT_SCANCEL_BIN: &str = "scancel";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_TAIL_LINES: usize = 10;
const DEFAULT_FOLLOW_DEDUP_WINDOW: usize = 50;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;
const DEFAULT_JOB_TIMEOUT_SECS: u64 = 172_800; // 48h
const DEFAULT_CANCEL_TIMEOUT_SECS: u64 = 3_600;
const DEFAULT_HASH_SIZE_LIMIT_BYTES: u64 = 134_217_728; // 128MB

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Storage endpoint could not be understood
    #[error("Invalid storage URL: {0}. Expected a file:// or http(s):// endpoint")]
    InvalidStorageUrl(String),

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// Failed to parse configuration value
    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

/// Main configuration structure for modelops
///
/// This struct holds every parameter the orchestrator needs to operate. It can
/// be constructed using `Default::default()` which loads from environment
/// variables with sensible fallback defaults.
#[derive(Debug, Clone)]
pub struct ModelOpsConfig {
    /// Storage endpoint; the scheme selects the backend implementation
    pub storage_url: String,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Directory where fetched model executables are placed
    pub executable_dir: PathBuf,

    /// Directory holding the per-model job scripts submitted to the scheduler
    pub job_script_dir: PathBuf,

    /// Submission binary (name resolved on PATH, or an absolute path)
    pub sbatch_bin: String,

    /// Queue query binary
    pub squeue_bin: String,

    /// Cancellation binary
    pub scancel_bin: String,

    /// Seconds between queue polls while following a job
    pub poll_interval_secs: u64,

    /// Sentinel lines echoed per poll while following a job
    pub tail_lines: usize,

    /// Duplicate-suppression window applied to followed output
    pub follow_dedup_window: usize,

    /// Seconds allowed for ordinary shell commands
    pub command_timeout_secs: u64,

    /// Seconds allowed for a model run, scheduled or direct
    pub job_timeout_secs: u64,

    /// Seconds to wait for a cancelled job to leave the queue
    pub cancel_timeout_secs: u64,

    /// Per-file byte ceiling when hashing the working directory
    pub hash_size_limit_bytes: u64,
}

impl Default for ModelOpsConfig {
    /// Creates a new configuration by loading from environment variables with defaults
    ///
    /// This will read MODELOPS_* environment variables and fall back to
    /// sensible defaults for any missing values. Storage credentials are read
    /// separately at the point of use (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY).
    fn default() -> Self {
        let storage_url =
            env::var("MODELOPS_STORAGE_URL").unwrap_or_else(|_| DEFAULT_STORAGE_URL.to_string());

        let log_level = env::var("MODELOPS_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        let executable_dir = env::var("MODELOPS_EXECUTABLE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_EXECUTABLE_DIR));

        let job_script_dir = env::var("MODELOPS_JOB_SCRIPT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_JOB_SCRIPT_DIR));

        let sbatch_bin =
            env::var("MODELOPS_SBATCH_BIN").unwrap_or_else(|_| DEFAULT_SBATCH_BIN.to_string());
        let squeue_bin =
            env::var("MODELOPS_SQUEUE_BIN").unwrap_or_else(|_| DEFAULT_SQUEUE_BIN.to_string());
        let scancel_bin =
            env::var("MODELOPS_SCANCEL_BIN").unwrap_or_else(|_| DEFAULT_SCANCEL_BIN.to_string());

        let poll_interval_secs = env::var("MODELOPS_POLL_INTERVAL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

        let tail_lines = env::var("MODELOPS_TAIL_LINES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_TAIL_LINES);

        let follow_dedup_window = env::var("MODELOPS_FOLLOW_DEDUP_WINDOW")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_FOLLOW_DEDUP_WINDOW);

        let command_timeout_secs = env::var("MODELOPS_COMMAND_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS);

        let job_timeout_secs = env::var("MODELOPS_JOB_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_JOB_TIMEOUT_SECS);

        let cancel_timeout_secs = env::var("MODELOPS_CANCEL_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_CANCEL_TIMEOUT_SECS);

        let hash_size_limit_bytes = env::var("MODELOPS_HASH_SIZE_LIMIT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_HASH_SIZE_LIMIT_BYTES);

        Self {
            storage_url,
            log_level,
            executable_dir,
            job_script_dir,
            sbatch_bin,
            squeue_bin,
            scancel_bin,
            poll_interval_secs,
            tail_lines,
            follow_dedup_window,
            command_timeout_secs,
            job_timeout_secs,
            cancel_timeout_secs,
            hash_size_limit_bytes,
        }
    }
}

impl ModelOpsConfig {
    /// Validates the configuration
    ///
    /// Checks that:
    /// - The storage URL carries a supported scheme
    /// - Cadence and timeout values are in valid ranges
    /// - Log level is valid
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any validation fails
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !["file://", "http://", "https://"]
            .iter()
            .any(|scheme| self.storage_url.starts_with(scheme))
        {
            return Err(ConfigError::InvalidStorageUrl(self.storage_url.clone()));
        }

        if self.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Poll interval must be at least 1 second".to_string(),
            ));
        }
        if self.tail_lines == 0 {
            return Err(ConfigError::ValidationFailed(
                "Tail line count must be at least 1".to_string(),
            ));
        }
        if self.follow_dedup_window == 0 {
            return Err(ConfigError::ValidationFailed(
                "Duplicate-suppression window must be at least 1".to_string(),
            ));
        }
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Command timeout must be at least 1 second".to_string(),
            ));
        }
        if self.job_timeout_secs < self.poll_interval_secs {
            return Err(ConfigError::ValidationFailed(
                "Job timeout cannot be shorter than the poll interval".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    /// Seconds between queue polls, as a [`Duration`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Timeout applied to ordinary shell commands
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Timeout applied to a full model run
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Timeout applied while waiting for a cancelled job to leave the queue
    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_secs(self.cancel_timeout_secs)
    }

    /// Path of the job script submitted for a given model
    pub fn job_script(&self, model_name: &str) -> PathBuf {
        self.job_script_dir.join(format!("{}.sh", model_name))
    }
}

impl fmt::Display for ModelOpsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ModelOps Configuration:")?;
        writeln!(f, "  Storage URL: {}", self.storage_url)?;
        writeln!(f, "  Executable Dir: {}", self.executable_dir.display())?;
        writeln!(f, "  Job Script Dir: {}", self.job_script_dir.display())?;
        writeln!(
            f,
            "  Scheduler: {} / {} / {}",
            self.sbatch_bin, self.squeue_bin, self.scancel_bin
        )?;
        writeln!(f, "  Poll Interval: {}s", self.poll_interval_secs)?;
        writeln!(f, "  Tail Lines: {}", self.tail_lines)?;
        writeln!(f, "  Follow Dedup Window: {}", self.follow_dedup_window)?;
        writeln!(f, "  Command Timeout: {}s", self.command_timeout_secs)?;
        writeln!(f, "  Job Timeout: {}s", self.job_timeout_secs)?;
        writeln!(f, "  Cancel Timeout: {}s", self.cancel_timeout_secs)?;
        writeln!(f, "  Hash Size Limit: {} bytes", self.hash_size_limit_bytes)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }

        fn unset(key: &str) -> Self {
            let old_value = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_configuration() {
        let _guards = vec![
            EnvGuard::unset("MODELOPS_STORAGE_URL"),
            EnvGuard::unset("MODELOPS_LOG_LEVEL"),
            EnvGuard::unset("MODELOPS_POLL_INTERVAL"),
            EnvGuard::unset("MODELOPS_JOB_TIMEOUT"),
        ];

        let config = ModelOpsConfig::default();

        assert_eq!(config.storage_url, DEFAULT_STORAGE_URL);
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(config.tail_lines, DEFAULT_TAIL_LINES);
        assert_eq!(config.follow_dedup_window, DEFAULT_FOLLOW_DEDUP_WINDOW);
        assert_eq!(config.command_timeout_secs, DEFAULT_COMMAND_TIMEOUT_SECS);
        assert_eq!(config.job_timeout_secs, DEFAULT_JOB_TIMEOUT_SECS);
        assert_eq!(config.hash_size_limit_bytes, DEFAULT_HASH_SIZE_LIMIT_BYTES);
    }

    #[test]
    #[serial]
    fn test_environment_variable_parsing() {
        let _guards = vec![
            EnvGuard::set("MODELOPS_STORAGE_URL", "https://storage.example.com"),
            EnvGuard::set("MODELOPS_LOG_LEVEL", "debug"),
            EnvGuard::set("MODELOPS_SBATCH_BIN", "/opt/slurm/bin/sbatch"),
            EnvGuard::set("MODELOPS_POLL_INTERVAL", "2"),
            EnvGuard::set("MODELOPS_TAIL_LINES", "25"),
            EnvGuard::set("MODELOPS_COMMAND_TIMEOUT", "60"),
            EnvGuard::set("MODELOPS_JOB_TIMEOUT", "7200"),
        ];

        let config = ModelOpsConfig::default();

        assert_eq!(config.storage_url, "https://storage.example.com");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.sbatch_bin, "/opt/slurm/bin/sbatch");
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.tail_lines, 25);
        assert_eq!(config.command_timeout_secs, 60);
        assert_eq!(config.job_timeout_secs, 7200);
    }

    #[test]
    #[serial]
    fn test_configuration_validation_valid() {
        let _guards = vec![
            EnvGuard::unset("MODELOPS_STORAGE_URL"),
            EnvGuard::unset("MODELOPS_LOG_LEVEL"),
        ];

        let config = ModelOpsConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configuration_validation_invalid_storage_url() {
        let config = ModelOpsConfig {
            storage_url: "ftp://storage.example.com".to_string(),
            ..ModelOpsConfig::default()
        };

        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::InvalidStorageUrl(_))));
    }

    #[test]
    fn test_configuration_validation_invalid_poll_interval() {
        let config = ModelOpsConfig {
            poll_interval_secs: 0,
            ..ModelOpsConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_configuration_validation_job_timeout_below_poll() {
        let config = ModelOpsConfig {
            poll_interval_secs: 10,
            job_timeout_secs: 5,
            ..ModelOpsConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_configuration_validation_invalid_log_level() {
        let config = ModelOpsConfig {
            log_level: "noisy".to_string(),
            ..ModelOpsConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_job_script_path() {
        let config = ModelOpsConfig {
            job_script_dir: PathBuf::from("/opt/modelops/jobs"),
            ..ModelOpsConfig::default()
        };

        assert_eq!(
            config.job_script("decomp"),
            PathBuf::from("/opt/modelops/jobs/decomp.sh")
        );
    }

    #[test]
    #[serial]
    fn test_config_display() {
        let _guard = EnvGuard::unset("MODELOPS_STORAGE_URL");
        let config = ModelOpsConfig::default();
        let display = format!("{}", config);
        assert!(display.contains("ModelOps Configuration:"));
        assert!(display.contains("Storage URL:"));
    }
}
