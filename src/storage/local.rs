//! Directory-backed storage
//!
//! Maps buckets onto subdirectories of a root path. Keys are relative paths
//! below the bucket directory, always separated by forward slashes so they
//! compare equal to the keys the remote gateway reports.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::storage::ObjectStorage;

/// Object storage on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.bucket_dir(bucket);
        for part in key.split('/') {
            path.push(part);
        }
        path
    }
}

#[async_trait]
impl ObjectStorage for LocalStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let bucket_dir = self.bucket_dir(bucket);
        if !bucket_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&bucket_dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&bucket_dir)
                .map_err(|_| Error::Validation("File listed outside its bucket".to_string()))?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn download(&self, bucket: &str, keys: &[String], dest: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dest).await?;
        let mut downloaded = Vec::new();
        for key in keys {
            let source = self.object_path(bucket, key);
            let filename = key.rsplit('/').next().unwrap_or(key);
            let target = dest.join(filename);
            fs::copy(&source, &target).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::NotFound(format!("File {} not found in {}", key, bucket))
                } else {
                    Error::Io(e)
                }
            })?;
            downloaded.push(target);
        }
        Ok(downloaded)
    }

    async fn fetch(&self, bucket: &str, key: &str) -> Result<String> {
        fs::read_to_string(self.object_path(bucket, key))
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::NotFound(format!("File {} not found in {}", key, bucket))
                } else {
                    Error::Io(e)
                }
            })
    }

    async fn upload(&self, local: &Path, bucket: &str, key: &str) -> Result<()> {
        let target = self.object_path(bucket, key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(local, &target).await?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        fs::remove_file(self.object_path(bucket, key))
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::NotFound(format!("File {} not found in {}", key, bucket))
                } else {
                    Error::Io(e)
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{check_and_delete, check_and_download, check_and_fetch};
    use tempfile::TempDir;

    fn store_with(objects: &[(&str, &str)]) -> (TempDir, LocalStore) {
        let root = TempDir::new().unwrap();
        for (path, content) in objects {
            let full = root.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        let store = LocalStore::new(root.path().to_path_buf());
        (root, store)
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let (_root, store) = store_with(&[
            ("bucket/newave/v28/newave", "bin"),
            ("bucket/newave/v28/nwlistop", "bin"),
            ("bucket/decomp/v31/decomp", "bin"),
        ]);

        let keys = store.list("bucket", "newave/v28").await.unwrap();
        assert_eq!(keys, vec!["newave/v28/newave", "newave/v28/nwlistop"]);
    }

    #[tokio::test]
    async fn test_list_missing_bucket_is_empty() {
        let (_root, store) = store_with(&[]);
        assert!(store.list("nope", "anything").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_uses_last_path_segment() {
        let (_root, store) = store_with(&[("bucket/studies/deck.zip", "payload")]);
        let dest = TempDir::new().unwrap();

        let paths = store
            .download("bucket", &["studies/deck.zip".to_string()], dest.path())
            .await
            .unwrap();

        assert_eq!(paths, vec![dest.path().join("deck.zip")]);
        assert_eq!(std::fs::read_to_string(&paths[0]).unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_fetch_missing_key_is_not_found() {
        let (_root, store) = store_with(&[]);
        let result = store.fetch("bucket", "absent.json").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_upload_roundtrip() {
        let (_root, store) = store_with(&[]);
        let scratch = TempDir::new().unwrap();
        let local = scratch.path().join("outputs.zip");
        std::fs::write(&local, "archive").unwrap();

        store
            .upload(&local, "bucket", "runs/42/outputs/outputs.zip")
            .await
            .unwrap();

        let fetched = store.fetch("bucket", "runs/42/outputs/outputs.zip").await.unwrap();
        assert_eq!(fetched, "archive");
    }

    #[tokio::test]
    async fn test_check_and_download_missing_prefix() {
        let (_root, store) = store_with(&[]);
        let dest = TempDir::new().unwrap();

        let result = check_and_download(&store, "bucket", "newave/v99", dest.path()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        // Nothing was transferred before the failure
        assert_eq!(std::fs::read_dir(dest.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_check_and_fetch_reads_first_match() {
        let (_root, store) = store_with(&[("bucket/runs/42/outputs/metadata.modelops", "{}")]);

        let content = check_and_fetch(&store, "bucket", "runs/42/outputs/metadata.modelops")
            .await
            .unwrap();
        assert_eq!(content, "{}");
    }

    #[tokio::test]
    async fn test_check_and_delete_removes_object() {
        let (_root, store) = store_with(&[("bucket/inbox/deck.zip", "payload")]);

        let deleted = check_and_delete(&store, "bucket", "inbox/deck.zip").await.unwrap();
        assert_eq!(deleted, "inbox/deck.zip");
        assert!(store.list("bucket", "inbox").await.unwrap().is_empty());
    }
}
