//! In-memory object store

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use super::{ObjectStore, StagedFile, StorageError, check_object_key};

/// Process-local object store, keyed by (bucket, key)
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an object directly, bypassing upload
    pub fn put(
        &self,
        bucket: &str,
        key: &str,
        content: impl Into<Vec<u8>>,
    ) -> Result<StagedFile, StorageError> {
        check_object_key(bucket, key)?;
        self.lock()?
            .insert((bucket.to_string(), key.to_string()), content.into());
        Ok(StagedFile::csv(self.scheme(), bucket, key))
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), Vec<u8>>>, StorageError> {
        self.objects
            .lock()
            .map_err(|_| StorageError::BackendError("object map lock poisoned".to_string()))
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn scheme(&self) -> &str {
        "mem"
    }

    async fn upload(
        &self,
        local_path: &Path,
        bucket: &str,
        remote_path: &str,
    ) -> Result<StagedFile, StorageError> {
        let content = tokio::fs::read(local_path)
            .await
            .map_err(|e| StorageError::from_io(e, local_path))?;
        let bytes = content.len();
        let staged = self.put(bucket, remote_path, content)?;
        info!(source = %local_path.display(), uri = %staged.uri(), bytes, "Uploaded file");
        Ok(staged)
    }

    async fn download(&self, bucket: &str, remote_path: &str) -> Result<Vec<u8>, StorageError> {
        check_object_key(bucket, remote_path)?;
        self.lock()?
            .get(&(bucket.to_string(), remote_path.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound(format!("mem://{bucket}/{remote_path}")))
    }

    async fn exists(&self, bucket: &str, remote_path: &str) -> Result<bool, StorageError> {
        check_object_key(bucket, remote_path)?;
        Ok(self
            .lock()?
            .contains_key(&(bucket.to_string(), remote_path.to_string())))
    }
}
