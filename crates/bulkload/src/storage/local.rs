//! Local filesystem backend

use super::{ByteStream, FileHandle, FileStore, StorageLocation};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Reads input files from the local filesystem
#[derive(Debug, Default, Clone)]
pub struct LocalFileStore;

impl LocalFileStore {
    pub fn new() -> Self {
        Self
    }
}

fn resolve(path: &str) -> StorageResult<PathBuf> {
    match StorageLocation::parse(path)? {
        StorageLocation::Local(local) => Ok(local),
        StorageLocation::S3 { .. } => Err(StorageError::InvalidPath {
            path: path.to_string(),
            reason: "object store path given to the local filesystem backend".to_string(),
        }),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn handle_for(path: &Path, size: u64) -> FileHandle {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    FileHandle::new(path.display().to_string(), name, Some(size))
}

#[async_trait]
impl FileStore for LocalFileStore {
    #[instrument(skip(self))]
    async fn list_entries(&self, path: &str) -> StorageResult<Vec<FileHandle>> {
        let root = resolve(path)?;

        let metadata = match tokio::fs::metadata(&root).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => return Err(io_error(&root, e)),
        };

        if metadata.is_file() {
            return Ok(vec![handle_for(&root, metadata.len())]);
        }

        let mut entries = tokio::fs::read_dir(&root)
            .await
            .map_err(|e| io_error(&root, e))?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&root, e))? {
            let entry_path = entry.path();
            // follows symlinks so a linked file is loaded like a regular one
            let metadata = tokio::fs::metadata(&entry_path)
                .await
                .map_err(|e| io_error(&entry_path, e))?;

            if metadata.is_file() {
                files.push(handle_for(&entry_path, metadata.len()));
            } else {
                debug!(entry = %entry_path.display(), "skipping non-file entry");
            }
        }

        files.sort_by(|a, b| a.location().cmp(b.location()));
        debug!(count = files.len(), "listed local files");
        Ok(files)
    }

    async fn open_read(&self, file: &FileHandle) -> StorageResult<ByteStream> {
        let path = PathBuf::from(file.location());
        let handle = tokio::fs::File::open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        Ok(Box::pin(handle))
    }
}
