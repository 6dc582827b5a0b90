//! Submit import command
//!
//! Stores the uploaded CSV as the job input, records a `pending` job and
//! queues it. The response is sent before any row is read.

use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::features::FeatureState;
use crate::jobs::queue::QueueError;
use crate::jobs::store::StoreError;
use crate::jobs::types::{JobStatus, NewJob, Resource};
use crate::storage::{import_key, ArtifactError};

/// Command to start an import job
#[derive(Debug, Clone)]
pub struct SubmitImportCommand {
    pub owner_id: Uuid,
    pub resource: String,
    pub file_name: String,
    pub content: Vec<u8>,
    pub update_existing: bool,
}

/// Response for any accepted job submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitImportError {
    #[error("Unknown resource '{0}'")]
    UnknownResource(String),

    #[error("Import is not supported for {0}")]
    NotImportable(Resource),

    #[error("Only .csv files are accepted, got '{0}'")]
    NotCsv(String),

    #[error("Uploaded file is empty")]
    EmptyFile,

    #[error("Uploaded file exceeds the limit of {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Failed to store upload: {0}")]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Job could not be queued: {0}")]
    Queue(#[from] QueueError),
}

impl Request<Result<SubmitJobResponse, SubmitImportError>> for SubmitImportCommand {}

impl SubmitImportCommand {
    pub fn validate(&self, max_upload_bytes: usize) -> Result<Resource, SubmitImportError> {
        let resource: Resource = self
            .resource
            .parse()
            .map_err(|_| SubmitImportError::UnknownResource(self.resource.clone()))?;
        if !resource.supports_import() {
            return Err(SubmitImportError::NotImportable(resource));
        }
        if !self.file_name.trim().to_lowercase().ends_with(".csv") {
            return Err(SubmitImportError::NotCsv(self.file_name.clone()));
        }
        if self.content.is_empty() {
            return Err(SubmitImportError::EmptyFile);
        }
        if self.content.len() > max_upload_bytes {
            return Err(SubmitImportError::TooLarge {
                limit: max_upload_bytes,
            });
        }
        Ok(resource)
    }
}

#[tracing::instrument(
    skip(state, command),
    fields(resource = %command.resource, file_name = %command.file_name, bytes = command.content.len())
)]
pub async fn handle(
    state: &FeatureState,
    command: SubmitImportCommand,
) -> Result<SubmitJobResponse, SubmitImportError> {
    let resource = command.validate(state.max_upload_bytes)?;

    let job_id = Uuid::new_v4();
    let key = import_key(job_id, &command.file_name);
    state.artifacts.put_bytes(&key, command.content, "text/csv").await?;

    let job = state
        .store
        .create(NewJob::import(
            job_id,
            command.owner_id,
            resource,
            command.file_name,
            command.update_existing,
            key.clone(),
        ))
        .await?;

    if let Err(e) = state.queue.enqueue(job.id) {
        tracing::warn!(job_id = %job.id, error = %e, "Rejecting import, queue unavailable");
        state.store.delete(job.id).await?;
        if let Err(cleanup) = state.artifacts.delete(&key).await {
            tracing::warn!(key = %key, error = %cleanup, "Failed to remove orphaned upload");
        }
        return Err(e.into());
    }

    tracing::info!(job_id = %job.id, "Import job accepted");
    Ok(SubmitJobResponse {
        job_id: job.id,
        status: job.status,
    })
}
