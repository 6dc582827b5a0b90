//! Externally visible job status

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::types::{ExportFormat, Job, JobKind, JobStatus, Resource};

/// Status payload served to clients polling a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub resource: Resource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ExportFormat>,
    pub file_name: String,
    pub status: JobStatus,
    /// `None` while an export has not counted its records yet
    pub percentage: Option<f64>,
    pub total_rows: Option<i64>,
    pub processed_rows: i64,
    pub success_count: i64,
    pub failed_count: i64,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_size: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StatusReport {
    pub fn from_job(job: &Job, now: DateTime<Utc>) -> Self {
        let downloadable = job.status == JobStatus::Completed && !job.is_expired(now);
        let output_ref = job.output_ref.clone().filter(|_| downloadable);

        Self {
            job_id: job.id,
            kind: job.kind,
            resource: job.resource,
            format: job.format(),
            file_name: job.file_name(),
            status: job.status,
            percentage: percentage(job),
            total_rows: job.total_rows,
            processed_rows: job.processed_rows,
            success_count: job.success_count,
            failed_count: job.failed_count,
            cancel_requested: job.cancel_requested,
            error_message: job.error_message.clone(),
            output_size: job.output_size.filter(|_| output_ref.is_some()),
            output_ref,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            expires_at: job.expires_at,
        }
    }
}

/// Share of rows processed, rounded to two decimals
pub fn percentage(job: &Job) -> Option<f64> {
    match job.total_rows {
        Some(total) if total > 0 => {
            let ratio = job.processed_rows as f64 / total as f64 * 100.0;
            Some((ratio * 100.0).round() / 100.0)
        },
        Some(_) => Some(0.0),
        None if job.kind == JobKind::Export => None,
        None => Some(0.0),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::jobs::types::NewJob;
    use chrono::Duration;
    use std::collections::BTreeMap;

    fn import_job() -> Job {
        NewJob::import(Uuid::new_v4(), Uuid::new_v4(), Resource::Wards, "wards.csv", false, "k")
            .into_job(Utc::now())
    }

    fn export_job() -> Job {
        NewJob::export(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Resource::Voters,
            ExportFormat::Csv,
            BTreeMap::new(),
            vec![],
        )
        .into_job(Utc::now())
    }

    #[test]
    fn test_percentage() {
        let mut job = import_job();
        assert_eq!(percentage(&job), Some(0.0));

        job.total_rows = Some(3);
        job.processed_rows = 1;
        assert_eq!(percentage(&job), Some(33.33));

        job.total_rows = Some(0);
        assert_eq!(percentage(&job), Some(0.0));

        assert_eq!(percentage(&export_job()), None);
    }

    #[test]
    fn test_output_hidden_until_completed_and_after_expiry() {
        let now = Utc::now();
        let mut job = export_job();
        job.output_ref = Some("exports/x/voters.csv".into());
        job.output_size = Some(42);
        job.status = JobStatus::Processing;
        assert!(StatusReport::from_job(&job, now).output_ref.is_none());

        job.status = JobStatus::Completed;
        job.expires_at = Some(now + Duration::hours(1));
        let report = StatusReport::from_job(&job, now);
        assert_eq!(report.output_ref.as_deref(), Some("exports/x/voters.csv"));
        assert_eq!(report.output_size, Some(42));

        job.expires_at = Some(now - Duration::seconds(1));
        let report = StatusReport::from_job(&job, now);
        assert!(report.output_ref.is_none());
        assert!(report.output_size.is_none());
    }

    #[test]
    fn test_serialized_shape() {
        let body = serde_json::to_value(StatusReport::from_job(&export_job(), Utc::now())).unwrap();
        assert_eq!(body["status"], "pending");
        assert_eq!(body["kind"], "export");
        assert_eq!(body["format"], "csv");
        assert!(body["percentage"].is_null());
        assert!(body.get("output_ref").is_none());
    }
}
