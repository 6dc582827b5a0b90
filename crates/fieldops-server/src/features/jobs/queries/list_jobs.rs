//! List jobs query

use chrono::Utc;
use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::features::shared::{PaginationMetadata, PaginationParams};
use crate::features::FeatureState;
use crate::jobs::reporter::StatusReport;
use crate::jobs::store::StoreError;
use crate::jobs::types::{JobFilter, JobKind, JobStatus, OwnerScope};

/// `GET /jobs?kind=import&status=processing&page=1&per_page=20`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobsQuery {
    #[serde(skip)]
    pub scope: Option<OwnerScope>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListJobsResponse {
    pub items: Vec<StatusReport>,
    pub pagination: PaginationMetadata,
}

#[derive(Debug, thiserror::Error)]
pub enum ListJobsError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Request<Result<ListJobsResponse, ListJobsError>> for ListJobsQuery {}

impl ListJobsQuery {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams::new(self.page, self.per_page)
    }

    pub fn validate(&self) -> Result<JobFilter, ListJobsError> {
        let pagination = self.pagination();
        pagination
            .validate()
            .map_err(|e| ListJobsError::Validation(e.to_string()))?;

        let kind = self
            .kind
            .as_deref()
            .map(str::parse::<JobKind>)
            .transpose()
            .map_err(|e| ListJobsError::Validation(e.to_string()))?;
        let status = self
            .status
            .as_deref()
            .map(str::parse::<JobStatus>)
            .transpose()
            .map_err(ListJobsError::Validation)?;

        Ok(JobFilter {
            kind,
            status,
            limit: pagination.per_page(),
            offset: pagination.offset(),
        })
    }
}

pub async fn handle(state: &FeatureState, query: ListJobsQuery) -> Result<ListJobsResponse, ListJobsError> {
    let filter = query.validate()?;
    let scope = query
        .scope
        .ok_or_else(|| ListJobsError::Validation("caller scope is required".into()))?;

    let (jobs, total) = state.store.list(scope, &filter).await?;
    let now = Utc::now();

    Ok(ListJobsResponse {
        items: jobs.iter().map(|job| StatusReport::from_job(job, now)).collect(),
        pagination: PaginationMetadata::from_params(&query.pagination(), total),
    })
}
