//! Download artifact query
//!
//! Hands out a time-limited link to the rendered export. Expired jobs answer
//! "gone" even before the reaper has removed them.

use chrono::{DateTime, Utc};
use mediator::Request;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::features::FeatureState;
use crate::jobs::store::StoreError;
use crate::jobs::types::{Job, JobKind, JobStatus, OwnerScope};
use crate::storage::ArtifactError;

#[derive(Debug, Clone)]
pub struct DownloadArtifactQuery {
    pub job_id: Uuid,
    pub scope: OwnerScope,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadArtifactResponse {
    pub download_url: String,
    pub file_name: String,
    pub content_type: String,
    pub row_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadArtifactError {
    #[error("Job '{0}' not found")]
    NotFound(Uuid),

    #[error("Job '{0}' is not an export")]
    NotExport(Uuid),

    #[error("Export is not ready (status: {0})")]
    NotReady(JobStatus),

    #[error("Export expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("Failed to prepare download: {0}")]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for DownloadArtifactError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => DownloadArtifactError::NotFound(id),
            other => DownloadArtifactError::Store(other),
        }
    }
}

impl Request<Result<DownloadArtifactResponse, DownloadArtifactError>> for DownloadArtifactQuery {}

/// Output reference of a job that may be downloaded at `now`
pub fn downloadable(job: &Job, now: DateTime<Utc>) -> Result<&str, DownloadArtifactError> {
    if job.kind != JobKind::Export {
        return Err(DownloadArtifactError::NotExport(job.id));
    }
    if job.status != JobStatus::Completed {
        return Err(DownloadArtifactError::NotReady(job.status));
    }
    if let Some(expires_at) = job.expires_at.filter(|_| job.is_expired(now)) {
        return Err(DownloadArtifactError::Expired(expires_at));
    }
    job.output_ref
        .as_deref()
        .ok_or(DownloadArtifactError::NotReady(job.status))
}

#[tracing::instrument(skip(state), fields(job_id = %query.job_id))]
pub async fn handle(
    state: &FeatureState,
    query: DownloadArtifactQuery,
) -> Result<DownloadArtifactResponse, DownloadArtifactError> {
    let job = state.store.get(query.job_id, query.scope).await?;
    let output_ref = downloadable(&job, query.now)?;

    // Links never outlive the retention window
    let ttl = job
        .expires_at
        .and_then(|expires_at| (expires_at - query.now).to_std().ok())
        .map_or(state.download_ttl, |left| left.min(state.download_ttl))
        .max(Duration::from_secs(1));
    let download_url = state.artifacts.download_url(output_ref, ttl).await?;

    Ok(DownloadArtifactResponse {
        download_url,
        file_name: job.file_name(),
        content_type: job
            .format()
            .map(|f| f.content_type())
            .unwrap_or("application/octet-stream")
            .to_string(),
        row_count: job.success_count,
        size_bytes: job.output_size,
        expires_at: job.expires_at,
    })
}
