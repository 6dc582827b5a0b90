//! Get job status query

use chrono::Utc;
use mediator::Request;
use uuid::Uuid;

use crate::features::FeatureState;
use crate::jobs::reporter::StatusReport;
use crate::jobs::store::StoreError;
use crate::jobs::types::OwnerScope;

#[derive(Debug, Clone)]
pub struct GetJobStatusQuery {
    pub job_id: Uuid,
    pub scope: OwnerScope,
}

#[derive(Debug, thiserror::Error)]
pub enum GetJobStatusError {
    #[error("Job '{0}' not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for GetJobStatusError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => GetJobStatusError::NotFound(id),
            other => GetJobStatusError::Store(other),
        }
    }
}

impl Request<Result<StatusReport, GetJobStatusError>> for GetJobStatusQuery {}

pub async fn handle(
    state: &FeatureState,
    query: GetJobStatusQuery,
) -> Result<StatusReport, GetJobStatusError> {
    let job = state.store.get(query.job_id, query.scope).await?;
    Ok(StatusReport::from_job(&job, Utc::now()))
}
