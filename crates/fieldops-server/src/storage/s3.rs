use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::config::S3Config;
use super::{ArtifactError, ArtifactReader, ArtifactStore};

/// S3 or MinIO backed artifact store
#[derive(Clone)]
pub struct S3ArtifactStore {
    client: Client,
    bucket: String,
}

impl S3ArtifactStore {
    pub async fn new(config: &S3Config) -> anyhow::Result<Self> {
        debug!(bucket = %config.bucket, endpoint = ?config.endpoint, "Initializing S3 storage");

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "fieldops-storage",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        info!(bucket = %config.bucket, "Storage client initialized");

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }

    async fn put_stream(
        &self,
        key: &str,
        body: ByteStream,
        content_type: &str,
        size: u64,
    ) -> Result<u64, ArtifactError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_length(size as i64)
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to upload s3://{}/{}", self.bucket, key))?;

        info!(bucket = %self.bucket, key, size, "Uploaded artifact");
        Ok(size)
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    #[instrument(skip(self, data))]
    async fn put_bytes(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<u64, ArtifactError> {
        let size = data.len() as u64;
        self.put_stream(key, ByteStream::from(data), content_type, size)
            .await
    }

    #[instrument(skip(self))]
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<u64, ArtifactError> {
        let size = tokio::fs::metadata(path).await?.len();
        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("Failed to open {} for upload", path.display()))?;
        self.put_stream(key, body, content_type, size).await
    }

    #[instrument(skip(self))]
    async fn open(&self, key: &str) -> Result<ArtifactReader, ArtifactError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("NoSuchKey") || message.contains("NotFound") {
                    ArtifactError::NotFound(key.to_string())
                } else {
                    ArtifactError::Backend(anyhow::anyhow!(
                        "Failed to get s3://{}/{}: {}",
                        self.bucket,
                        key,
                        message
                    ))
                }
            })?;

        Ok(Box::pin(response.body.into_async_read()))
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), ArtifactError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to delete s3://{}/{}", self.bucket, key))?;

        info!(bucket = %self.bucket, key, "Deleted artifact");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn download_url(&self, key: &str, expires_in: Duration) -> Result<String, ArtifactError> {
        let presigning =
            PresigningConfig::expires_in(expires_in).context("Failed to create presigning config")?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .context("Failed to generate presigned URL")?;

        Ok(request.uri().to_string())
    }
}
