//! Durable record of jobs and their row errors
//!
//! The store is the single source of truth for job status. Every status
//! change goes through [`JobStore::transition`], which is a compare-and-set
//! against the transition table in [`JobStatus`]; counters only move through
//! [`JobStore::bump_progress`] as deltas.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::types::{Job, JobFilter, JobStatus, NewJob, OwnerScope, RowError, TransitionFields};

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job '{0}' not found")]
    NotFound(Uuid),

    #[error("Job '{job_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job '{job_id}' is already {status}")]
    TerminalState { job_id: Uuid, status: JobStatus },

    #[error("Job '{job_id}' is {status} and does not accept progress")]
    NotRunning { job_id: Uuid, status: JobStatus },

    #[error("Progress for job '{job_id}' would exceed its {total} rows")]
    ProgressOverflow { job_id: Uuid, total: i64 },

    #[error("Job '{job_id}' already has an error for row {row_number}")]
    DuplicateRowError { job_id: Uuid, row_number: i64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt job record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job in `pending`
    async fn create(&self, job: NewJob) -> StoreResult<Job>;

    /// Fetch a job; jobs outside `scope` are reported as not found
    async fn get(&self, id: Uuid, scope: OwnerScope) -> StoreResult<Job>;

    /// Jobs visible to `scope`, newest first, with the unpaged total
    async fn list(&self, scope: OwnerScope, filter: &JobFilter) -> StoreResult<(Vec<Job>, i64)>;

    /// Move a job to `to` if the table allows it from its current status
    async fn transition(&self, id: Uuid, to: JobStatus, fields: TransitionFields)
        -> StoreResult<Job>;

    /// Add counter deltas. Only legal while processing and never past `total_rows`.
    async fn bump_progress(&self, id: Uuid, success: i64, failed: i64) -> StoreResult<()>;

    /// Record row errors. Only legal while validating or processing.
    async fn append_errors(&self, id: Uuid, errors: &[RowError]) -> StoreResult<()>;

    async fn append_error(&self, id: Uuid, error: RowError) -> StoreResult<()> {
        self.append_errors(id, std::slice::from_ref(&error)).await
    }

    /// Persist one checkpoint worth of buffered outcomes
    async fn record_checkpoint(
        &self,
        id: Uuid,
        success: i64,
        failed: i64,
        errors: &[RowError],
    ) -> StoreResult<()> {
        if !errors.is_empty() {
            self.append_errors(id, errors).await?;
        }
        if success != 0 || failed != 0 {
            self.bump_progress(id, success, failed).await?;
        }
        Ok(())
    }

    /// Row errors ordered by row number
    async fn list_errors(&self, id: Uuid, scope: OwnerScope) -> StoreResult<Vec<RowError>>;

    /// Flag a non-terminal job for cancellation; the status is left alone
    async fn mark_cancel_requested(&self, id: Uuid, scope: OwnerScope) -> StoreResult<Job>;

    async fn is_cancel_requested(&self, id: Uuid) -> StoreResult<bool>;

    async fn ids_with_status(&self, status: JobStatus) -> StoreResult<Vec<Uuid>>;

    /// Terminal jobs whose `expires_at` is before `now`
    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Job>>;

    /// Remove a job and its row errors. Returns false if it was already gone.
    async fn delete(&self, id: Uuid) -> StoreResult<bool>;
}
