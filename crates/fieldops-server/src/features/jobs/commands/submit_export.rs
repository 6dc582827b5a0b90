//! Submit export command

use mediator::Request;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::submit_import::SubmitJobResponse;
use crate::features::FeatureState;
use crate::jobs::processor::{ExportQuery, RendererRegistry};
use crate::jobs::queue::QueueError;
use crate::jobs::store::StoreError;
use crate::jobs::types::{ExportFormat, NewJob, Resource};

/// Command to start an export job
///
/// ```json
/// { "resource": "voters", "format": "csv", "filters": {"ward_code": "KA-AC-150-W-001"}, "fields": ["id", "name"] }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitExportCommand {
    /// Set from the caller identity, never from the body
    #[serde(skip)]
    pub owner_id: Uuid,

    pub resource: String,

    pub format: String,

    #[serde(default)]
    pub filters: BTreeMap<String, String>,

    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitExportError {
    #[error("Unknown resource '{0}'")]
    UnknownResource(String),

    #[error("Unknown export format '{0}'")]
    UnknownFormat(String),

    #[error("Export format '{0}' is not supported")]
    UnsupportedFormat(ExportFormat),

    #[error("{0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Job could not be queued: {0}")]
    Queue(#[from] QueueError),
}

impl Request<Result<SubmitJobResponse, SubmitExportError>> for SubmitExportCommand {}

impl SubmitExportCommand {
    pub fn validate(&self, renderers: &RendererRegistry) -> Result<(Resource, ExportFormat), SubmitExportError> {
        let resource: Resource = self
            .resource
            .parse()
            .map_err(|_| SubmitExportError::UnknownResource(self.resource.clone()))?;
        let format: ExportFormat = self
            .format
            .parse()
            .map_err(|_| SubmitExportError::UnknownFormat(self.format.clone()))?;
        if !renderers.supports(format) {
            return Err(SubmitExportError::UnsupportedFormat(format));
        }
        ExportQuery::new(resource, &self.fields, &self.filters).map_err(SubmitExportError::InvalidQuery)?;
        Ok((resource, format))
    }
}

#[tracing::instrument(skip(state, command), fields(resource = %command.resource, format = %command.format))]
pub async fn handle(
    state: &FeatureState,
    command: SubmitExportCommand,
) -> Result<SubmitJobResponse, SubmitExportError> {
    let (resource, format) = command.validate(&state.renderers)?;

    let job = state
        .store
        .create(NewJob::export(
            Uuid::new_v4(),
            command.owner_id,
            resource,
            format,
            command.filters,
            command.fields,
        ))
        .await?;

    if let Err(e) = state.queue.enqueue(job.id) {
        tracing::warn!(job_id = %job.id, error = %e, "Rejecting export, queue unavailable");
        state.store.delete(job.id).await?;
        return Err(e.into());
    }

    tracing::info!(job_id = %job.id, "Export job accepted");
    Ok(SubmitJobResponse {
        job_id: job.id,
        status: job.status,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn command(json: serde_json::Value) -> SubmitExportCommand {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_owner_is_not_read_from_body() {
        let owner = Uuid::new_v4();
        let cmd = command(serde_json::json!({
            "owner_id": owner, "resource": "voters", "format": "csv"
        }));
        assert!(cmd.owner_id.is_nil());
        assert!(cmd.filters.is_empty() && cmd.fields.is_empty());
    }

    #[test]
    fn test_validate() {
        let renderers = RendererRegistry::with_defaults();
        let ok = command(serde_json::json!({"resource": "wards", "format": "json", "fields": ["id", "name"]}));
        assert_eq!(ok.validate(&renderers).unwrap(), (Resource::Wards, ExportFormat::Json));

        let bad_format = command(serde_json::json!({"resource": "wards", "format": "docx"}));
        assert!(matches!(bad_format.validate(&renderers), Err(SubmitExportError::UnknownFormat(_))));

        let bad_field = command(serde_json::json!({"resource": "wards", "format": "csv", "fields": ["password"]}));
        assert!(matches!(bad_field.validate(&renderers), Err(SubmitExportError::InvalidQuery(_))));
    }

    #[test]
    fn test_formats_without_renderer_are_rejected() {
        let renderers = RendererRegistry::with_defaults();
        for format in ["excel", "pdf"] {
            let cmd = command(serde_json::json!({"resource": "wards", "format": format}));
            assert!(
                matches!(cmd.validate(&renderers), Err(SubmitExportError::UnsupportedFormat(_))),
                "{format}"
            );
        }

        let empty = RendererRegistry::default();
        let csv = command(serde_json::json!({"resource": "wards", "format": "csv"}));
        assert!(matches!(
            csv.validate(&empty),
            Err(SubmitExportError::UnsupportedFormat(ExportFormat::Csv))
        ));
    }
}
