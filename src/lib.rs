//! modelops - stage runner for energy-planning models on HPC clusters
//!
//! This library drives executions of the Brazilian energy-planning model
//! families (NEWAVE, DECOMP, DESSEM) on a batch cluster. An execution is a
//! sequence of stages, each run as its own process by the cluster job
//! script: fetch executables, fetch inputs, extract and sanitize, fingerprint,
//! preprocess, run, diagnose, postprocess, compress and upload.
//!
//! # Core Concepts
//!
//! - **Model adapters**: each family implements the [`models::ModelAdapter`]
//!   stage contract with its own deck formats, report diagnosis and archive
//!   layout
//! - **Metadata descriptor**: a JSON file in the working directory carries
//!   the execution identity between stage processes and downstream runs
//! - **Chaining**: a run can couple to a parent execution, pulling its cut
//!   archives from storage after validating that the parent succeeded
//!
//! # Example Usage
//!
//! ```ignore
//! use modelops::{ModelFactory, ModelOpsConfig, StageContext};
//!
//! async fn fetch_executables(model_name: &str, path: &str) -> modelops::Result<()> {
//!     let config = ModelOpsConfig::default();
//!     config.validate()?;
//!     let ctx = StageContext::new(config)?;
//!
//!     let model = ModelFactory::create(model_name)?;
//!     model.check_and_fetch_executables(&ctx, path).await
//! }
//! ```
//!
//! # Project Structure
//!
//! - [`models`]: the stage contract and the three family adapters
//! - [`deck`]: parsers for the deck entry, index and report files
//! - [`scheduler`]: SLURM submission, following and cancellation
//! - [`storage`]: object storage clients and transfer helpers

// Public modules
pub mod archive;
pub mod bridge;
pub mod cache;
pub mod cli;
pub mod config;
pub mod deck;
pub mod error;
pub mod files;
pub mod hashing;
pub mod metadata;
pub mod models;
pub mod process;
pub mod scheduler;
pub mod status;
pub mod storage;

// Re-export key types for convenient access
pub use config::{ConfigError, ModelOpsConfig};
pub use error::{Error, Result};
pub use models::{ModelAdapter, ModelFactory, StageContext};
pub use status::RunStatus;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name_is_modelops() {
        assert_eq!(NAME, "modelops");
    }
}
