//! S3 object storage
//!
//! Stages files in Amazon S3 buckets or S3-compatible storage such as MinIO.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ObjectStore, StagedFile, StorageError, check_object_key};

/// S3 connection settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Settings {
    /// AWS region (optional, uses default if not specified)
    pub region: Option<String>,
    /// AWS profile name (optional)
    pub profile: Option<String>,
    /// Endpoint URL (for S3-compatible storage like MinIO)
    pub endpoint_url: Option<String>,
}

impl S3Settings {
    /// Set the AWS region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the AWS profile
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Set a custom endpoint URL (for S3-compatible storage)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint.into());
        self
    }
}

/// S3 client wrapper
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Create a store with credentials from the default provider chain
    ///
    /// Credentials are loaded from the environment in this order:
    /// 1. Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY)
    /// 2. AWS credentials file (~/.aws/credentials)
    /// 3. IAM role (if running on AWS infrastructure)
    pub async fn new(settings: &S3Settings) -> Self {
        let mut config_loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &settings.region {
            config_loader = config_loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(profile) = &settings.profile {
            config_loader = config_loader.profile_name(profile);
        }

        let config = config_loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&config);

        if let Some(endpoint) = &settings.endpoint_url {
            s3_config = s3_config.endpoint_url(endpoint);
            s3_config = s3_config.force_path_style(true);
        }

        Self {
            client: S3Client::from_conf(s3_config.build()),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn scheme(&self) -> &str {
        "s3"
    }

    async fn upload(
        &self,
        local_path: &Path,
        bucket: &str,
        remote_path: &str,
    ) -> Result<StagedFile, StorageError> {
        check_object_key(bucket, remote_path)?;

        let content = tokio::fs::read(local_path)
            .await
            .map_err(|e| StorageError::from_io(e, local_path))?;
        let bytes = content.len();

        self.client
            .put_object()
            .bucket(bucket)
            .key(remote_path)
            .content_type("text/csv")
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|e| {
                StorageError::BackendError(format!(
                    "put s3://{}/{}: {}",
                    bucket,
                    remote_path,
                    DisplayErrorContext(&e)
                ))
            })?;

        let staged = StagedFile::csv(self.scheme(), bucket, remote_path);
        info!(source = %local_path.display(), uri = %staged.uri(), bytes, "Uploaded file");
        Ok(staged)
    }

    async fn download(&self, bucket: &str, remote_path: &str) -> Result<Vec<u8>, StorageError> {
        check_object_key(bucket, remote_path)?;
        let uri = format!("s3://{}/{}", bucket, remote_path);
        debug!(uri = %uri, "Downloading object");

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(remote_path)
            .send()
            .await
            .map_err(|e| {
                let message = DisplayErrorContext(&e).to_string();
                match e.into_service_error() {
                    err if err.is_no_such_key() => StorageError::ObjectNotFound(uri.clone()),
                    _ => StorageError::BackendError(format!("get {}: {}", uri, message)),
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::IoError(e.to_string()))?;

        Ok(bytes.into_bytes().to_vec())
    }

    async fn exists(&self, bucket: &str, remote_path: &str) -> Result<bool, StorageError> {
        check_object_key(bucket, remote_path)?;

        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(remote_path)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let message = DisplayErrorContext(&e).to_string();
                if e.into_service_error().is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::BackendError(message))
                }
            }
        }
    }
}
