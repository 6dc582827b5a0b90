//! Cancel job command

use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::features::FeatureState;
use crate::jobs::canceller::{self, CancelError};
use crate::jobs::types::{JobStatus, OwnerScope};

#[derive(Debug, Clone)]
pub struct CancelJobCommand {
    pub job_id: Uuid,
    pub scope: OwnerScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub job_id: Uuid,
    /// Still the pre-cancel status; the runner applies `cancelled`
    pub status: JobStatus,
    pub cancel_requested: bool,
}

impl Request<Result<CancelJobResponse, CancelError>> for CancelJobCommand {}

#[tracing::instrument(skip(state), fields(job_id = %command.job_id))]
pub async fn handle(
    state: &FeatureState,
    command: CancelJobCommand,
) -> Result<CancelJobResponse, CancelError> {
    let job = canceller::cancel(state.store.as_ref(), command.job_id, command.scope).await?;
    Ok(CancelJobResponse {
        job_id: job.id,
        status: job.status,
        cancel_requested: job.cancel_requested,
    })
}
