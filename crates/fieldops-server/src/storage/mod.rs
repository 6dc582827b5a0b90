//! Artifact storage for job inputs and rendered exports
//!
//! The pipeline only talks to [`ArtifactStore`]. Production deployments use
//! [`S3ArtifactStore`] (AWS S3 or MinIO); development and tests use
//! [`LocalArtifactStore`].

use async_trait::async_trait;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use uuid::Uuid;

pub mod config;
pub mod local;
pub mod s3;

pub use local::LocalArtifactStore;
pub use s3::S3ArtifactStore;

use config::{StorageBackend, StorageConfig};

/// Streaming handle on a stored artifact
pub type ArtifactReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Invalid artifact key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store an in-memory payload, returning its size in bytes
    async fn put_bytes(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<u64, ArtifactError>;

    /// Store a local file, returning its size in bytes
    async fn put_file(&self, key: &str, path: &Path, content_type: &str)
        -> Result<u64, ArtifactError>;

    async fn open(&self, key: &str) -> Result<ArtifactReader, ArtifactError>;

    /// Remove an artifact. Removing a missing artifact is not an error.
    async fn delete(&self, key: &str) -> Result<(), ArtifactError>;

    /// A time-limited reference clients can fetch the artifact from
    async fn download_url(&self, key: &str, expires_in: Duration) -> Result<String, ArtifactError>;
}

/// Build the configured artifact store
pub async fn from_config(config: &StorageConfig) -> anyhow::Result<Arc<dyn ArtifactStore>> {
    let store: Arc<dyn ArtifactStore> = match config.backend {
        StorageBackend::S3 => Arc::new(S3ArtifactStore::new(&config.s3).await?),
        StorageBackend::Local => Arc::new(LocalArtifactStore::new(&config.local_root).await?),
    };
    Ok(store)
}

/// Key of the uploaded input of an import job
pub fn import_key(job_id: Uuid, file_name: &str) -> String {
    format!("imports/{}/{}", job_id, sanitize_file_name(file_name))
}

/// Key of the rendered artifact of an export job
pub fn export_key(job_id: Uuid, file_name: &str) -> String {
    format!("exports/{}/{}", job_id, sanitize_file_name(file_name))
}

/// Keep the final path segment and replace anything outside `[A-Za-z0-9._-]`
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .trim();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload.csv".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("wards.csv"), "wards.csv");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\booth list.csv"), "booth_list.csv");
        assert_eq!(sanitize_file_name("..."), "upload.csv");
    }

    #[test]
    fn test_keys_are_namespaced_by_job() {
        let job_id = Uuid::nil();
        assert_eq!(
            import_key(job_id, "users.csv"),
            "imports/00000000-0000-0000-0000-000000000000/users.csv"
        );
        assert!(export_key(job_id, "voters_export_20260101.csv").starts_with("exports/"));
    }
}
