//! Local filesystem object store
//!
//! Buckets are directories under a root path and object keys are relative
//! paths inside them. Keys containing ".." are rejected so objects stay
//! within their bucket.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use super::{ObjectStore, StagedFile, StorageError, check_object_key};

/// Object store backed by a local directory
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of an object
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        check_object_key(bucket, key)?;
        Ok(self.root.join(bucket).join(key.trim_start_matches('/')))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn scheme(&self) -> &str {
        "file"
    }

    async fn upload(
        &self,
        local_path: &Path,
        bucket: &str,
        remote_path: &str,
    ) -> Result<StagedFile, StorageError> {
        let target = self.object_path(bucket, remote_path)?;

        let content = fs::read(local_path)
            .await
            .map_err(|e| StorageError::from_io(e, local_path))?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::from_io(e, parent))?;
        }
        fs::write(&target, &content)
            .await
            .map_err(|e| StorageError::from_io(e, &target))?;

        let staged = StagedFile::csv(self.scheme(), bucket, remote_path);
        info!(
            source = %local_path.display(),
            uri = %staged.uri(),
            bytes = content.len(),
            "Uploaded file"
        );
        Ok(staged)
    }

    async fn download(&self, bucket: &str, remote_path: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, remote_path)?;
        debug!(path = %path.display(), "Reading object");
        fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                StorageError::ObjectNotFound(format!("file://{}/{}", bucket, remote_path))
            }
            _ => StorageError::from_io(e, &path),
        })
    }

    async fn exists(&self, bucket: &str, remote_path: &str) -> Result<bool, StorageError> {
        let path = self.object_path(bucket, remote_path)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::from_io(e, &path))
    }
}
