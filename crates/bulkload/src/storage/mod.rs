//! Input file storage
//!
//! A [`FileStore`] enumerates the files directly under a path and opens them
//! as async byte streams. Two backends are provided:
//!
//! - [`LocalFileStore`] for plain paths and `file://` URLs
//! - [`S3FileStore`] for `s3://bucket/prefix` (also `s3a://`)
//!
//! Enumeration is non-recursive and sorted by location, so a single run sees
//! a stable order.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;

pub mod local;
pub mod s3;

pub use local::LocalFileStore;
pub use s3::{S3Config, S3FileStore};

/// Readable body of one input file
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Reference to one input file, produced by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    location: String,
    name: String,
    size: Option<u64>,
}

impl FileHandle {
    pub fn new(location: impl Into<String>, name: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            location: location.into(),
            name: name.into(),
            size,
        }
    }

    /// Full path or URL, unique within a listing
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Last path segment
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}

/// Source of input files
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Files directly under `path`, sorted by location.
    ///
    /// Returns [`StorageError::NotFound`] when `path` does not exist and an
    /// empty list when it exists but holds no files.
    async fn list_entries(&self, path: &str) -> StorageResult<Vec<FileHandle>>;

    /// Open `file` for reading.
    async fn open_read(&self, file: &FileHandle) -> StorageResult<ByteStream>;
}

/// Where a storage path points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    Local(PathBuf),
    S3 { bucket: String, key: String },
}

impl StorageLocation {
    pub fn parse(path: &str) -> StorageResult<Self> {
        let invalid = |reason: &str| StorageError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if let Some(rest) = path
            .strip_prefix("s3://")
            .or_else(|| path.strip_prefix("s3a://"))
        {
            let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(invalid("missing bucket name"));
            }
            return Ok(StorageLocation::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        if path.starts_with("file:") {
            let url = url::Url::parse(path).map_err(|e| invalid(&e.to_string()))?;
            let local = url
                .to_file_path()
                .map_err(|_| invalid("not a local file URL"))?;
            return Ok(StorageLocation::Local(local));
        }

        if let Some((scheme, _)) = path.split_once("://") {
            return Err(invalid(&format!("unsupported scheme '{}'", scheme)));
        }

        if path.is_empty() {
            return Err(invalid("empty path"));
        }

        Ok(StorageLocation::Local(PathBuf::from(path)))
    }
}

/// Pick the backend that serves `path`.
pub async fn store_for_path(path: &str) -> StorageResult<Arc<dyn FileStore>> {
    match StorageLocation::parse(path)? {
        StorageLocation::Local(_) => Ok(Arc::new(LocalFileStore::new())),
        StorageLocation::S3 { .. } => {
            let store = S3FileStore::new(S3Config::from_env()).await;
            Ok(Arc::new(store))
        }
    }
}
