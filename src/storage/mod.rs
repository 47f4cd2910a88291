//! Object storage access
//!
//! Executables, input decks and results live in bucket-addressed object
//! storage. The [`ObjectStorage`] trait abstracts over the concrete backend;
//! the implementation is selected from the configured endpoint scheme:
//! `file://` maps buckets onto a local directory tree (used by the on-premise
//! clusters and the test suite), `http://` and `https://` talk to the remote
//! storage gateway.
//!
//! Storage locations are passed around as `bucket/key/...` paths, split by
//! [`split_bucket_key`]. The `check_and_*` helpers wrap the raw operations
//! with an existence check: acting on a prefix that lists to nothing is a
//! [`Error::NotFound`], reported before any transfer starts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::ModelOpsConfig;
use crate::error::{Error, Result};

pub mod http;
pub mod local;

pub use http::HttpStore;
pub use local::LocalStore;

/// Backend-agnostic object storage operations
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Keys under `prefix` in `bucket`; empty when nothing matches
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// Downloads each key into `dest`, named after the key's last path
    /// segment, and returns the local paths
    async fn download(&self, bucket: &str, keys: &[String], dest: &Path) -> Result<Vec<PathBuf>>;

    /// Reads an object as text
    async fn fetch(&self, bucket: &str, key: &str) -> Result<String>;

    /// Uploads a local file to `bucket/key`
    async fn upload(&self, local: &Path, bucket: &str, key: &str) -> Result<()>;

    /// Removes an object
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Builds the storage client selected by the configured endpoint scheme
pub fn client_from_config(config: &ModelOpsConfig) -> Result<Box<dyn ObjectStorage>> {
    let url = config.storage_url.as_str();
    if let Some(root) = url.strip_prefix("file://") {
        debug!(root, "Using local storage backend");
        return Ok(Box::new(LocalStore::new(PathBuf::from(root))));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        debug!(url, "Using HTTP storage backend");
        return Ok(Box::new(HttpStore::from_env(url, config.command_timeout())?));
    }
    Err(Error::Configuration(format!(
        "Unsupported storage URL scheme: {}",
        url
    )))
}

/// Splits a `bucket/key/...` storage path into its bucket and key parts
pub fn split_bucket_key(path: &str) -> Result<(String, String)> {
    let trimmed = path.trim_matches('/');
    match trimmed.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
            Ok((bucket.to_string(), key.to_string()))
        }
        _ => Err(Error::Validation(format!(
            "Storage path '{}' must have the form bucket/key",
            path
        ))),
    }
}

/// Downloads everything under `prefix`, failing with [`Error::NotFound`]
/// when the prefix lists to nothing
pub async fn check_and_download(
    storage: &dyn ObjectStorage,
    bucket: &str,
    prefix: &str,
    dest: &Path,
) -> Result<Vec<PathBuf>> {
    info!(bucket, prefix, "Fetching storage items");
    let keys = storage.list(bucket, prefix).await?;
    if keys.is_empty() {
        return Err(Error::NotFound(format!(
            "Items {} not found in {}",
            prefix, bucket
        )));
    }
    debug!(found = keys.len(), "Found storage items");

    let downloaded = storage.download(bucket, &keys, dest).await?;
    if downloaded.len() != keys.len() {
        return Err(Error::ExternalTool {
            tool: "storage".to_string(),
            message: format!("Items {} not fully downloaded", prefix),
        });
    }
    info!(count = downloaded.len(), "Downloaded storage items");
    Ok(downloaded)
}

/// Reads a single object as text, failing with [`Error::NotFound`] when the
/// key does not exist
pub async fn check_and_fetch(
    storage: &dyn ObjectStorage,
    bucket: &str,
    key: &str,
) -> Result<String> {
    info!(bucket, key, "Fetching storage object");
    let keys = storage.list(bucket, key).await?;
    if keys.is_empty() {
        return Err(Error::NotFound(format!(
            "File {} not found in {}",
            key, bucket
        )));
    }
    storage.fetch(bucket, &keys[0]).await
}

/// Deletes a single object, failing with [`Error::NotFound`] when the key
/// does not exist
pub async fn check_and_delete(
    storage: &dyn ObjectStorage,
    bucket: &str,
    key: &str,
) -> Result<String> {
    info!(bucket, key, "Deleting storage object");
    let keys = storage.list(bucket, key).await?;
    if keys.is_empty() {
        return Err(Error::NotFound(format!(
            "File {} not found in {}",
            key, bucket
        )));
    }
    storage.delete(bucket, &keys[0]).await?;
    debug!(key = %keys[0], "Deleted storage object");
    Ok(keys[0].clone())
}
