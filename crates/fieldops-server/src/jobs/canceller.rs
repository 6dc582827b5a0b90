//! Cooperative cancellation
//!
//! Cancelling only raises a flag on the job. The runner executing it reads
//! the flag at its next checkpoint and moves the job to `cancelled`.

use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use super::store::{JobStore, StoreError};
use super::types::{Job, JobStatus, OwnerScope};

#[derive(Debug, Error)]
pub enum CancelError {
    #[error("Job '{0}' not found")]
    NotFound(Uuid),

    #[error("Job is already {0} and cannot be cancelled")]
    AlreadyTerminal(JobStatus),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CancelError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => CancelError::NotFound(id),
            StoreError::TerminalState { status, .. } => CancelError::AlreadyTerminal(status),
            other => CancelError::Store(other),
        }
    }
}

/// Request cancellation of a job visible to `scope`. Returns the job with
/// its flag raised; its status is unchanged.
#[instrument(skip(store), fields(job_id = %job_id))]
pub async fn cancel(store: &dyn JobStore, job_id: Uuid, scope: OwnerScope) -> Result<Job, CancelError> {
    let job = store.mark_cancel_requested(job_id, scope).await?;
    info!(status = %job.status, "Cancellation requested");
    Ok(job)
}
