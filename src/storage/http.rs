//! Storage gateway client
//!
//! Talks to the HTTP storage gateway that fronts the object store on
//! clusters without direct bucket access. Objects are addressed as
//! `{base}/{bucket}/{key}`; listing a prefix is a GET on the bucket with a
//! `prefix` query parameter, answered with a JSON array of keys.
//!
//! The gateway forwards the caller's object-store credentials, which are
//! read from `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY` and attached
//! as headers to every request. Requests share the configured command
//! timeout, so a stalled gateway cannot hang a pipeline stage.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::ObjectStorage;

const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";
const SECRET_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";
const ACCESS_KEY_HEADER: &str = "x-access-key-id";
const SECRET_KEY_HEADER: &str = "x-secret-access-key";

/// Object storage behind the HTTP gateway
#[derive(Debug, Clone)]
pub struct HttpStore {
    base_url: String,
    client: reqwest::Client,
    access_key: Option<String>,
    secret_key: Option<String>,
}

impl HttpStore {
    /// Creates a client for `base_url`, reading credentials from the
    /// environment
    pub fn from_env(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            access_key: env::var(ACCESS_KEY_ENV).ok(),
            secret_key: env::var(SECRET_KEY_ENV).ok(),
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, bucket, key.trim_start_matches('/'))
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/{}", self.base_url, bucket)
    }

    fn with_credentials(&self, builder: RequestBuilder) -> RequestBuilder {
        let mut builder = builder;
        if let Some(access_key) = &self.access_key {
            builder = builder.header(ACCESS_KEY_HEADER, access_key);
        }
        if let Some(secret_key) = &self.secret_key {
            builder = builder.header(SECRET_KEY_HEADER, secret_key);
        }
        builder
    }
}

#[async_trait]
impl ObjectStorage for HttpStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let request = self
            .client
            .get(self.bucket_url(bucket))
            .query(&[("prefix", prefix)]);
        let response = self.with_credentials(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = response.error_for_status()?.json().await?;
        debug!(bucket, prefix, found = keys.len(), "Listed gateway objects");
        Ok(keys)
    }

    async fn download(&self, bucket: &str, keys: &[String], dest: &Path) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(dest).await?;
        let mut downloaded = Vec::new();
        for key in keys {
            let request = self.client.get(self.object_url(bucket, key));
            let response = self.with_credentials(request).send().await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(Error::NotFound(format!(
                    "File {} not found in {}",
                    key, bucket
                )));
            }
            let bytes = response.error_for_status()?.bytes().await?;

            let filename = key.rsplit('/').next().unwrap_or(key);
            let target = dest.join(filename);
            tokio::fs::write(&target, &bytes).await?;
            downloaded.push(target);
        }
        Ok(downloaded)
    }

    async fn fetch(&self, bucket: &str, key: &str) -> Result<String> {
        let request = self.client.get(self.object_url(bucket, key));
        let response = self.with_credentials(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!(
                "File {} not found in {}",
                key, bucket
            )));
        }
        Ok(response.error_for_status()?.text().await?)
    }

    async fn upload(&self, local: &Path, bucket: &str, key: &str) -> Result<()> {
        let content = tokio::fs::read(local).await?;
        let request = self.client.put(self.object_url(bucket, key)).body(content);
        self.with_credentials(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let request = self.client.delete(self.object_url(bucket, key));
        let response = self.with_credentials(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!(
                "File {} not found in {}",
                key, bucket
            )));
        }
        response.error_for_status()?;
        Ok(())
    }
}
