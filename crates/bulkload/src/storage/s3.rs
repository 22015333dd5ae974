//! S3-compatible object store backend
//!
//! Object stores have no directories. A path `s3://bucket/prefix` is treated
//! as the "directory" `prefix/`: its files are the objects directly beneath it
//! and deeper keys (common prefixes) are skipped. The path exists when
//! anything lives under the prefix, including a `prefix/` marker object, or
//! when `prefix` is itself an object key.

use super::{ByteStream, FileHandle, FileStore, StorageLocation};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    Client,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use tracing::{debug, info, instrument};

/// Default region when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for the object store
#[derive(Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Custom endpoint for MinIO and other S3-compatible stores
    pub endpoint: Option<String>,
    pub region: String,
    /// Static credentials; when absent the AWS default provider chain is used
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "****"))
            .field("path_style", &self.path_style)
            .finish()
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
            access_key: None,
            secret_key: None,
            path_style: false,
        }
    }
}

impl S3Config {
    /// Read `S3_ENDPOINT`, `S3_REGION`, `S3_ACCESS_KEY`/`AWS_ACCESS_KEY_ID`,
    /// `S3_SECRET_KEY`/`AWS_SECRET_ACCESS_KEY` and `S3_PATH_STYLE`.
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    /// Settings for a local MinIO instance.
    pub fn for_minio(
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: DEFAULT_REGION.to_string(),
            access_key: Some(access_key.into()),
            secret_key: Some(secret_key.into()),
            path_style: true,
        }
    }
}

/// Reads input files from an S3-compatible object store
#[derive(Clone)]
pub struct S3FileStore {
    client: Client,
}

impl S3FileStore {
    pub async fn new(config: S3Config) -> Self {
        debug!("Initializing object store client with config: {:?}", config);

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => aws_sdk_s3::Config::builder().credentials_provider(
                Credentials::new(access_key, secret_key, None, None, "bulkload"),
            ),
            _ => {
                let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        builder = builder
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(endpoint = ?config.endpoint, region = %config.region, "Object store client initialized");

        Self::from_client(Client::from_conf(builder.build()))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn resolve(path: &str) -> StorageResult<(String, String)> {
        match StorageLocation::parse(path)? {
            StorageLocation::S3 { bucket, key } => Ok((bucket, key)),
            StorageLocation::Local(_) => Err(StorageError::InvalidPath {
                path: path.to_string(),
                reason: "local path given to the object store backend".to_string(),
            }),
        }
    }

    async fn object_size(&self, bucket: &str, key: &str, path: &str) -> StorageResult<Option<u64>> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(head) => Ok(Some(head.content_length().unwrap_or(0).max(0) as u64)),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(object_store_error(path, DisplayErrorContext(&e))),
        }
    }
}

fn object_store_error(path: &str, error: impl fmt::Display) -> StorageError {
    StorageError::ObjectStore {
        path: path.to_string(),
        message: error.to_string(),
    }
}

/// `prefix` as a directory: empty for the bucket root, otherwise ending in `/`.
fn directory_prefix(key: &str) -> String {
    if key.is_empty() || key.ends_with('/') {
        key.to_string()
    } else {
        format!("{}/", key)
    }
}

fn key_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[async_trait]
impl FileStore for S3FileStore {
    #[instrument(skip(self))]
    async fn list_entries(&self, path: &str) -> StorageResult<Vec<FileHandle>> {
        let (bucket, key) = Self::resolve(path)?;
        let prefix = directory_prefix(&key);

        let mut files = Vec::new();
        let mut anything_under_prefix = false;
        let mut continuation = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&bucket)
                .prefix(&prefix)
                .delimiter("/");
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_bucket()) => {
                    return Err(StorageError::NotFound(path.to_string()))
                }
                Err(e) => return Err(object_store_error(path, DisplayErrorContext(&e))),
            };

            for object in response.contents() {
                anything_under_prefix = true;
                let Some(object_key) = object.key() else {
                    continue;
                };
                if object_key == prefix {
                    // directory marker
                    continue;
                }
                files.push(FileHandle::new(
                    format!("s3://{}/{}", bucket, object_key),
                    key_name(object_key),
                    object.size().map(|s| s.max(0) as u64),
                ));
            }

            for common in response.common_prefixes() {
                anything_under_prefix = true;
                debug!(prefix = ?common.prefix(), "skipping nested prefix");
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        if !anything_under_prefix && !prefix.is_empty() {
            if !key.ends_with('/') {
                if let Some(size) = self.object_size(&bucket, &key, path).await? {
                    return Ok(vec![FileHandle::new(
                        format!("s3://{}/{}", bucket, key),
                        key_name(&key),
                        Some(size),
                    )]);
                }
            }
            return Err(StorageError::NotFound(path.to_string()));
        }

        files.sort_by(|a, b| a.location().cmp(b.location()));
        debug!(count = files.len(), "listed object store files");
        Ok(files)
    }

    async fn open_read(&self, file: &FileHandle) -> StorageResult<ByteStream> {
        let (bucket, key) = Self::resolve(file.location())?;

        let response = self
            .client
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| object_store_error(file.location(), DisplayErrorContext(&e)))?;

        Ok(Box::pin(response.body.into_async_read()))
    }
}
