//! Job API routes
//!
//! # Route Structure
//!
//! - `POST /api/v1/jobs/imports/:resource` - Upload a CSV and start an import
//! - `POST /api/v1/jobs/exports` - Start an export
//! - `GET /api/v1/jobs` - List the caller's jobs
//! - `GET /api/v1/jobs/:job_id` - Job status and progress
//! - `GET /api/v1/jobs/:job_id/errors` - Row errors (`?format=csv` for a report)
//! - `POST /api/v1/jobs/:job_id/cancel` - Request cancellation (also `DELETE /:job_id`)
//! - `GET /api/v1/jobs/:job_id/download` - Link to a completed export
//! - `GET /api/v1/jobs/templates/:resource` - CSV import template

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::{
    commands::{
        self, CancelJobCommand, SubmitExportCommand, SubmitExportError, SubmitImportCommand,
        SubmitImportError,
    },
    queries::{
        self, DownloadArtifactError, DownloadArtifactQuery, GetImportTemplateError,
        GetImportTemplateQuery, GetJobStatusError, GetJobStatusQuery, ListJobErrorsError,
        ListJobErrorsQuery, ListJobsError, ListJobsQuery,
    },
};
use crate::api::response::{ApiResponse, ErrorResponse};
use crate::features::FeatureState;
use crate::jobs::canceller::CancelError;
use crate::jobs::queue::QueueError;
use crate::middleware::Principal;

// ============================================================================
// Router Configuration
// ============================================================================

pub fn jobs_routes() -> Router<FeatureState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/imports/:resource", post(submit_import))
        .route("/exports", post(submit_export))
        .route("/templates/:resource", get(get_import_template))
        .route("/:job_id", get(get_job_status).delete(cancel_job))
        .route("/:job_id/cancel", post(cancel_job))
        .route("/:job_id/errors", get(list_job_errors))
        .route("/:job_id/download", get(download_artifact))
}

// ============================================================================
// Command Handlers (Write Operations)
// ============================================================================

/// Multipart fields: `file` (required) and `update_existing` (optional boolean)
///
/// - `202 Accepted` with `{job_id, status: "pending"}`
/// - `400` unknown resource, not a CSV, empty file
/// - `413` upload larger than the configured limit
/// - `503` job queue full
#[tracing::instrument(skip(state, multipart), fields(user_id = %principal.user_id, resource = %resource))]
async fn submit_import(
    State(state): State<FeatureState>,
    principal: Principal,
    Path(resource): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, JobsApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut update_existing = false;

    while let Some(field) = multipart.next_field().await.map_err(JobsApiError::multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload.csv").to_string();
                let data = field.bytes().await.map_err(JobsApiError::multipart)?;
                file = Some((file_name, data.to_vec()));
            },
            "update_existing" => {
                let value = field.text().await.map_err(JobsApiError::multipart)?;
                update_existing = parse_flag(&value)?;
            },
            _ => {},
        }
    }

    let (file_name, content) =
        file.ok_or_else(|| JobsApiError::BadRequest("No file field found in multipart data".into()))?;

    let command = SubmitImportCommand {
        owner_id: principal.user_id,
        resource,
        file_name,
        content,
        update_existing,
    };
    let response = commands::submit_import::handle(&state, command).await?;

    Ok(ApiResponse::success(response).with_status(StatusCode::ACCEPTED))
}

#[tracing::instrument(skip(state, command), fields(user_id = %principal.user_id))]
async fn submit_export(
    State(state): State<FeatureState>,
    principal: Principal,
    Json(mut command): Json<SubmitExportCommand>,
) -> Result<Response, JobsApiError> {
    command.owner_id = principal.user_id;
    let response = commands::submit_export::handle(&state, command).await?;

    Ok(ApiResponse::success(response).with_status(StatusCode::ACCEPTED))
}

/// `202 Accepted` once the flag is raised; `409` if the job already finished
async fn cancel_job(
    State(state): State<FeatureState>,
    principal: Principal,
    Path(job_id): Path<Uuid>,
) -> Result<Response, JobsApiError> {
    let command = CancelJobCommand {
        job_id,
        scope: principal.scope(),
    };
    let response = commands::cancel_job::handle(&state, command).await?;

    Ok(ApiResponse::success(response).with_status(StatusCode::ACCEPTED))
}

// ============================================================================
// Query Handlers (Read Operations)
// ============================================================================

async fn list_jobs(
    State(state): State<FeatureState>,
    principal: Principal,
    Query(mut query): Query<ListJobsQuery>,
) -> Result<Response, JobsApiError> {
    query.scope = Some(principal.scope());
    let response = queries::list_jobs::handle(&state, query).await?;

    Ok(ApiResponse::success(response).into_response())
}

async fn get_job_status(
    State(state): State<FeatureState>,
    principal: Principal,
    Path(job_id): Path<Uuid>,
) -> Result<Response, JobsApiError> {
    let query = GetJobStatusQuery {
        job_id,
        scope: principal.scope(),
    };
    let report = queries::get_job_status::handle(&state, query).await?;

    Ok(ApiResponse::success(report).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct ErrorsParams {
    format: Option<String>,
}

async fn list_job_errors(
    State(state): State<FeatureState>,
    principal: Principal,
    Path(job_id): Path<Uuid>,
    Query(params): Query<ErrorsParams>,
) -> Result<Response, JobsApiError> {
    let query = ListJobErrorsQuery {
        job_id,
        scope: principal.scope(),
    };
    let errors = queries::list_job_errors::handle(&state, query).await?;

    match params.format.as_deref().map(str::to_lowercase).as_deref() {
        None | Some("json") => {
            let total = errors.len();
            Ok(ApiResponse::success_with_meta(errors, serde_json::json!({ "total": total }))
                .into_response())
        },
        Some("csv") => {
            let body = queries::list_job_errors::render_csv(&errors)?;
            Ok(csv_attachment(&format!("job_{}_errors.csv", job_id), body))
        },
        Some(other) => Err(JobsApiError::BadRequest(format!(
            "Unsupported error report format '{}'",
            other
        ))),
    }
}

/// `200` with a time-limited link; `409` while not completed; `410` once expired
async fn download_artifact(
    State(state): State<FeatureState>,
    principal: Principal,
    Path(job_id): Path<Uuid>,
) -> Result<Response, JobsApiError> {
    let query = DownloadArtifactQuery {
        job_id,
        scope: principal.scope(),
        now: Utc::now(),
    };
    let response = queries::download_artifact::handle(&state, query).await?;

    Ok(ApiResponse::success(response).into_response())
}

async fn get_import_template(Path(resource): Path<String>) -> Result<Response, JobsApiError> {
    let template = queries::get_import_template::handle(GetImportTemplateQuery { resource })?;
    Ok(csv_attachment(&template.file_name, template.content))
}

fn csv_attachment(file_name: &str, body: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        body,
    )
        .into_response()
}

fn parse_flag(value: &str) -> Result<bool, JobsApiError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "" | "false" | "0" | "no" | "off" => Ok(false),
        other => Err(JobsApiError::BadRequest(format!(
            "update_existing must be a boolean, got '{}'",
            other
        ))),
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum JobsApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Gone(String),
    PayloadTooLarge(String),
    Unavailable(String),
    Internal(String),
}

impl JobsApiError {
    fn multipart(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            JobsApiError::PayloadTooLarge(e.body_text())
        } else {
            JobsApiError::BadRequest(format!("Invalid multipart data: {}", e.body_text()))
        }
    }

    fn internal(e: impl std::fmt::Display) -> Self {
        JobsApiError::Internal(e.to_string())
    }
}

impl From<SubmitImportError> for JobsApiError {
    fn from(e: SubmitImportError) -> Self {
        match e {
            SubmitImportError::UnknownResource(_)
            | SubmitImportError::NotImportable(_)
            | SubmitImportError::NotCsv(_)
            | SubmitImportError::EmptyFile => JobsApiError::BadRequest(e.to_string()),
            SubmitImportError::TooLarge { .. } => JobsApiError::PayloadTooLarge(e.to_string()),
            SubmitImportError::Queue(QueueError::Full) | SubmitImportError::Queue(QueueError::Closed) => {
                JobsApiError::Unavailable(e.to_string())
            },
            SubmitImportError::Artifact(_) | SubmitImportError::Store(_) => JobsApiError::internal(e),
        }
    }
}

impl From<SubmitExportError> for JobsApiError {
    fn from(e: SubmitExportError) -> Self {
        match e {
            SubmitExportError::UnknownResource(_)
            | SubmitExportError::UnknownFormat(_)
            | SubmitExportError::UnsupportedFormat(_)
            | SubmitExportError::InvalidQuery(_) => JobsApiError::BadRequest(e.to_string()),
            SubmitExportError::Queue(_) => JobsApiError::Unavailable(e.to_string()),
            SubmitExportError::Store(_) => JobsApiError::internal(e),
        }
    }
}

impl From<CancelError> for JobsApiError {
    fn from(e: CancelError) -> Self {
        match e {
            CancelError::NotFound(_) => JobsApiError::NotFound(e.to_string()),
            CancelError::AlreadyTerminal(_) => JobsApiError::Conflict(e.to_string()),
            CancelError::Store(_) => JobsApiError::internal(e),
        }
    }
}

impl From<ListJobsError> for JobsApiError {
    fn from(e: ListJobsError) -> Self {
        match e {
            ListJobsError::Validation(m) => JobsApiError::BadRequest(m),
            ListJobsError::Store(_) => JobsApiError::internal(e),
        }
    }
}

impl From<GetJobStatusError> for JobsApiError {
    fn from(e: GetJobStatusError) -> Self {
        match e {
            GetJobStatusError::NotFound(_) => JobsApiError::NotFound(e.to_string()),
            GetJobStatusError::Store(_) => JobsApiError::internal(e),
        }
    }
}

impl From<ListJobErrorsError> for JobsApiError {
    fn from(e: ListJobErrorsError) -> Self {
        match e {
            ListJobErrorsError::NotFound(_) => JobsApiError::NotFound(e.to_string()),
            ListJobErrorsError::NotImport(_) => JobsApiError::Conflict(e.to_string()),
            ListJobErrorsError::Render(_) | ListJobErrorsError::Store(_) => JobsApiError::internal(e),
        }
    }
}

impl From<DownloadArtifactError> for JobsApiError {
    fn from(e: DownloadArtifactError) -> Self {
        match e {
            DownloadArtifactError::NotFound(_) => JobsApiError::NotFound(e.to_string()),
            DownloadArtifactError::NotExport(_) | DownloadArtifactError::NotReady(_) => {
                JobsApiError::Conflict(e.to_string())
            },
            DownloadArtifactError::Expired(_) => JobsApiError::Gone(e.to_string()),
            DownloadArtifactError::Artifact(_) | DownloadArtifactError::Store(_) => {
                JobsApiError::internal(e)
            },
        }
    }
}

impl From<GetImportTemplateError> for JobsApiError {
    fn from(e: GetImportTemplateError) -> Self {
        match e {
            GetImportTemplateError::UnknownResource(_) | GetImportTemplateError::NotImportable(_) => {
                JobsApiError::BadRequest(e.to_string())
            },
            GetImportTemplateError::Render(_) => JobsApiError::internal(e),
        }
    }
}

impl IntoResponse for JobsApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            JobsApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", m),
            JobsApiError::NotFound(m) => (StatusCode::NOT_FOUND, "NOT_FOUND", m),
            JobsApiError::Conflict(m) => (StatusCode::CONFLICT, "CONFLICT", m),
            JobsApiError::Gone(m) => (StatusCode::GONE, "GONE", m),
            JobsApiError::PayloadTooLarge(m) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", m)
            },
            JobsApiError::Unavailable(m) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", m)
            },
            JobsApiError::Internal(m) => {
                tracing::error!(error = %m, "Job API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            },
        };

        ErrorResponse::new(code, message).into_response_with(status)
    }
}
