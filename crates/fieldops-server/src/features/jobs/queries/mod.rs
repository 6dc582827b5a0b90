//! Job queries (read operations)

pub mod download_artifact;
pub mod get_import_template;
pub mod get_job_status;
pub mod list_job_errors;
pub mod list_jobs;

pub use download_artifact::{DownloadArtifactError, DownloadArtifactQuery, DownloadArtifactResponse};
pub use get_import_template::{GetImportTemplateError, GetImportTemplateQuery, ImportTemplate};
pub use get_job_status::{GetJobStatusError, GetJobStatusQuery};
pub use list_job_errors::{ListJobErrorsError, ListJobErrorsQuery};
pub use list_jobs::{ListJobsError, ListJobsQuery, ListJobsResponse};
