//! Object storage abstraction
//!
//! Defines the ObjectStore trait used to stage source files before loading,
//! and the `StagedFile` reference a load job consumes:
//! - LocalObjectStore: buckets as directories under a root path
//! - InMemoryObjectStore: process-local objects (tests, dry runs)
//! - S3ObjectStore: Amazon S3 or an S3-compatible endpoint (feature `s3`)

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod local;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

pub use local::LocalObjectStore;
pub use memory::InMemoryObjectStore;
#[cfg(feature = "s3")]
pub use s3::{S3ObjectStore, S3Settings};

/// Error type for object storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("Object not found: {0}")]
    ObjectNotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Invalid object URI: {0}")]
    InvalidUri(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

impl StorageError {
    /// Map an IO error raised while touching `path`
    pub(crate) fn from_io(err: std::io::Error, path: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::FileNotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => {
                StorageError::PermissionDenied(path.display().to_string())
            }
            _ => StorageError::IoError(format!("{}: {}", path.display(), err)),
        }
    }
}

/// Format of a staged file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Comma-delimited text
    #[default]
    Csv,
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Reference to a file placed in object storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFile {
    /// URI scheme of the store that holds the object (file, mem, s3)
    pub scheme: String,
    pub bucket: String,
    /// Object key within the bucket
    pub path: String,
    pub format: SourceFormat,
    /// Number of header rows preceding the data
    pub header_rows: usize,
}

impl StagedFile {
    /// A CSV object with a single header row
    pub fn csv(
        scheme: impl Into<String>,
        bucket: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            bucket: bucket.into(),
            path: path.into(),
            format: SourceFormat::Csv,
            header_rows: 1,
        }
    }

    /// Conventional object key for a raw upload: `raw/<file name>`
    pub fn raw_path(local: &Path) -> Option<String> {
        let name = local.file_name()?.to_str()?;
        Some(format!("raw/{}", name))
    }

    /// Full URI, e.g. `s3://bucket/raw/Online_Retail.csv`
    pub fn uri(&self) -> String {
        format!("{}://{}/{}", self.scheme, self.bucket, self.path)
    }

    /// Parse a `<scheme>://<bucket>/<path>` URI as a CSV object
    pub fn parse(uri: &str) -> Result<Self, StorageError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| StorageError::InvalidUri(format!("{uri}: missing scheme")))?;
        let (bucket, path) = rest
            .split_once('/')
            .ok_or_else(|| StorageError::InvalidUri(format!("{uri}: missing object path")))?;

        if scheme.is_empty() || bucket.is_empty() || path.is_empty() {
            return Err(StorageError::InvalidUri(uri.to_string()));
        }

        Ok(Self::csv(scheme, bucket, path))
    }
}

impl std::fmt::Display for StagedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri())
    }
}

/// Trait for object storage backends
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// URI scheme for objects held by this store
    fn scheme(&self) -> &str;

    /// Upload a local file to `bucket/remote_path`
    async fn upload(
        &self,
        local_path: &Path,
        bucket: &str,
        remote_path: &str,
    ) -> Result<StagedFile, StorageError>;

    /// Read an object's full contents
    async fn download(&self, bucket: &str, remote_path: &str) -> Result<Vec<u8>, StorageError>;

    /// Check if an object exists
    async fn exists(&self, bucket: &str, remote_path: &str) -> Result<bool, StorageError>;
}

/// Reject object keys that could escape their bucket
pub(crate) fn check_object_key(bucket: &str, key: &str) -> Result<(), StorageError> {
    if bucket.is_empty() || bucket.contains('/') || bucket.contains("..") {
        return Err(StorageError::InvalidUri(format!("invalid bucket name '{bucket}'")));
    }
    if key.is_empty() || key.split('/').any(|part| part == "..") {
        return Err(StorageError::InvalidUri(format!("invalid object key '{key}'")));
    }
    Ok(())
}
