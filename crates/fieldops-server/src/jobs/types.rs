//! Job and row error model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub use fieldops_common::types::{ExportFormat, JobKind, Resource};

/// Lifecycle state of a bulk job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Validating,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// Every legal status change. Anything not listed is rejected by the store.
const TRANSITIONS: &[(JobStatus, JobStatus)] = &[
    (JobStatus::Pending, JobStatus::Validating),
    (JobStatus::Pending, JobStatus::Cancelled),
    (JobStatus::Validating, JobStatus::Processing),
    (JobStatus::Validating, JobStatus::Failed),
    (JobStatus::Validating, JobStatus::Cancelled),
    (JobStatus::Processing, JobStatus::Completed),
    (JobStatus::Processing, JobStatus::Failed),
    (JobStatus::Processing, JobStatus::Cancelled),
];

impl JobStatus {
    pub const TERMINAL: [JobStatus; 3] =
        [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Validating => "validating",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// Whether rows may be recorded against a job in this state
    pub fn is_running(&self) -> bool {
        matches!(self, JobStatus::Validating | JobStatus::Processing)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        TRANSITIONS.contains(&(*self, next))
    }

    /// States from which `target` is reachable in one step
    pub fn sources_of(target: JobStatus) -> Vec<JobStatus> {
        TRANSITIONS
            .iter()
            .filter(|(_, to)| *to == target)
            .map(|(from, _)| *from)
            .collect()
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "validating" => Ok(JobStatus::Validating),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind specific parameters captured at submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobParams {
    Import {
        file_name: String,
        update_existing: bool,
    },
    Export {
        format: ExportFormat,
        #[serde(default)]
        filters: BTreeMap<String, String>,
        #[serde(default)]
        fields: Vec<String>,
    },
}

impl JobParams {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::Import { .. } => JobKind::Import,
            JobParams::Export { .. } => JobKind::Export,
        }
    }
}

/// Which jobs a caller may see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerScope {
    /// Only jobs submitted by this principal
    Owner(Uuid),
    /// Every job (privileged principals and the pipeline itself)
    Any,
}

impl OwnerScope {
    pub fn permits(&self, owner_id: Uuid) -> bool {
        match self {
            OwnerScope::Owner(id) => *id == owner_id,
            OwnerScope::Any => true,
        }
    }

    pub fn owner_id(&self) -> Option<Uuid> {
        match self {
            OwnerScope::Owner(id) => Some(*id),
            OwnerScope::Any => None,
        }
    }
}

/// A tracked bulk import or export
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub resource: Resource,
    pub status: JobStatus,
    pub owner_id: Uuid,
    pub params: JobParams,
    pub input_ref: Option<String>,
    pub output_ref: Option<String>,
    pub output_size: Option<i64>,
    pub total_rows: Option<i64>,
    pub processed_rows: i64,
    pub success_count: i64,
    pub failed_count: i64,
    pub cancel_requested: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn format(&self) -> Option<ExportFormat> {
        match &self.params {
            JobParams::Export { format, .. } => Some(*format),
            JobParams::Import { .. } => None,
        }
    }

    /// Name of the uploaded file or of the export artifact
    pub fn file_name(&self) -> String {
        match &self.params {
            JobParams::Import { file_name, .. } => file_name.clone(),
            JobParams::Export { format, .. } => format!(
                "{}_export_{}.{}",
                self.resource,
                self.created_at.format("%Y%m%d"),
                format.extension()
            ),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// Submission data for [`JobStore::create`](super::store::JobStore::create)
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub resource: Resource,
    pub owner_id: Uuid,
    pub params: JobParams,
    pub input_ref: Option<String>,
}

impl NewJob {
    pub fn import(
        id: Uuid,
        owner_id: Uuid,
        resource: Resource,
        file_name: impl Into<String>,
        update_existing: bool,
        input_ref: impl Into<String>,
    ) -> Self {
        Self {
            id,
            resource,
            owner_id,
            params: JobParams::Import {
                file_name: file_name.into(),
                update_existing,
            },
            input_ref: Some(input_ref.into()),
        }
    }

    pub fn export(
        id: Uuid,
        owner_id: Uuid,
        resource: Resource,
        format: ExportFormat,
        filters: BTreeMap<String, String>,
        fields: Vec<String>,
    ) -> Self {
        Self {
            id,
            resource,
            owner_id,
            params: JobParams::Export {
                format,
                filters,
                fields,
            },
            input_ref: None,
        }
    }

    pub fn into_job(self, created_at: DateTime<Utc>) -> Job {
        Job {
            id: self.id,
            kind: self.params.kind(),
            resource: self.resource,
            status: JobStatus::Pending,
            owner_id: self.owner_id,
            params: self.params,
            input_ref: self.input_ref,
            output_ref: None,
            output_size: None,
            total_rows: None,
            processed_rows: 0,
            success_count: 0,
            failed_count: 0,
            cancel_requested: false,
            error_message: None,
            created_at,
            started_at: None,
            completed_at: None,
            expires_at: None,
        }
    }
}

/// Fields written together with a status change. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub total_rows: Option<i64>,
    pub output_ref: Option<String>,
    pub output_size: Option<i64>,
    pub error_message: Option<String>,
}

impl TransitionFields {
    /// Timestamps for a terminal transition at `now`
    pub fn finished(now: DateTime<Utc>, retention: chrono::Duration) -> Self {
        Self {
            completed_at: Some(now),
            expires_at: Some(now + retention),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_output(mut self, output_ref: String, output_size: i64) -> Self {
        self.output_ref = Some(output_ref);
        self.output_size = Some(output_size);
        self
    }

    pub fn apply_to(&self, job: &mut Job) {
        if let Some(v) = self.started_at {
            job.started_at = Some(v);
        }
        if let Some(v) = self.completed_at {
            job.completed_at = Some(v);
        }
        if let Some(v) = self.expires_at {
            job.expires_at = Some(v);
        }
        if let Some(v) = self.total_rows {
            job.total_rows = Some(v);
        }
        if let Some(ref v) = self.output_ref {
            job.output_ref = Some(v.clone());
        }
        if let Some(v) = self.output_size {
            job.output_size = Some(v);
        }
        if let Some(ref v) = self.error_message {
            job.error_message = Some(v.clone());
        }
    }
}

/// Why one input row was not applied. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub job_id: Uuid,
    pub row_number: i64,
    pub field: Option<String>,
    pub message: String,
    pub raw_row: serde_json::Value,
}

impl RowError {
    pub fn new(
        job_id: Uuid,
        row_number: i64,
        field: Option<String>,
        message: impl Into<String>,
        raw_row: serde_json::Value,
    ) -> Self {
        Self {
            job_id,
            row_number,
            field,
            message: message.into(),
            raw_row,
        }
    }
}

/// Filters for listing jobs
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub kind: Option<JobKind>,
    pub status: Option<JobStatus>,
    pub limit: i64,
    pub offset: i64,
}
