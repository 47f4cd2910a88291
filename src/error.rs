//! Error taxonomy shared by every pipeline stage
//!
//! Callers need to tell apart a misconfigured invocation, a missing remote
//! or local artifact, a deck that fails validation, an exhausted wall-clock
//! budget, and an external program that exited non-zero. Each of these is a
//! distinct variant so the CLI boundary can log and exit while library
//! callers can still match on the condition.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the orchestration pipeline and its building blocks.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing command, unknown model name, unusable settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A remote key or local file/field a stage requires does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Parent metadata incomplete or mismatched, deck missing a required
    /// register, or an artifact failed an integrity check.
    #[error("validation error: {0}")]
    Validation(String),

    /// A process or job exceeded its wall-clock budget.
    #[error("timed out after {seconds}s: {context}")]
    Timeout { seconds: u64, context: String },

    /// A shelled-out program exited non-zero (timeouts are reported as
    /// `Timeout`, never as this variant).
    #[error("external tool failed: {tool}: {message}")]
    ExternalTool { tool: String, message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl Error {
    /// True when the failure is a wall-clock timeout; callers treat these
    /// as retryable at a level above this crate.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
