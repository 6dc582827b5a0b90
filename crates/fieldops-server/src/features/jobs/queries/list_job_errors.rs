//! List job errors query
//!
//! Row errors are readable while the job runs; the list only grows.

use mediator::Request;
use uuid::Uuid;

use crate::features::FeatureState;
use crate::jobs::store::StoreError;
use crate::jobs::types::{JobKind, OwnerScope, RowError};

pub const ERROR_REPORT_HEADER: [&str; 4] = ["Row Number", "Field", "Error Message", "Row Data"];

#[derive(Debug, Clone)]
pub struct ListJobErrorsQuery {
    pub job_id: Uuid,
    pub scope: OwnerScope,
}

#[derive(Debug, thiserror::Error)]
pub enum ListJobErrorsError {
    #[error("Job '{0}' not found")]
    NotFound(Uuid),

    #[error("Job '{0}' is an export and has no row errors")]
    NotImport(Uuid),

    #[error("Failed to render error report: {0}")]
    Render(#[from] csv::Error),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ListJobErrorsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ListJobErrorsError::NotFound(id),
            other => ListJobErrorsError::Store(other),
        }
    }
}

impl Request<Result<Vec<RowError>, ListJobErrorsError>> for ListJobErrorsQuery {}

pub async fn handle(
    state: &FeatureState,
    query: ListJobErrorsQuery,
) -> Result<Vec<RowError>, ListJobErrorsError> {
    let job = state.store.get(query.job_id, query.scope).await?;
    if job.kind != JobKind::Import {
        return Err(ListJobErrorsError::NotImport(job.id));
    }
    Ok(state.store.list_errors(job.id, query.scope).await?)
}

/// Render row errors as a downloadable CSV report
pub fn render_csv(errors: &[RowError]) -> Result<Vec<u8>, ListJobErrorsError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(ERROR_REPORT_HEADER)?;
    for error in errors {
        let raw = if error.raw_row.is_null() {
            String::new()
        } else {
            error.raw_row.to_string()
        };
        writer.write_record([
            error.row_number.to_string().as_str(),
            error.field.as_deref().unwrap_or(""),
            error.message.as_str(),
            raw.as_str(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| ListJobErrorsError::Render(csv::Error::from(e.into_error())))
}
