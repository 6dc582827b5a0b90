//! PostgreSQL job store
//!
//! Counter updates are single `UPDATE ... SET x = x + $n` statements guarded by
//! the status and total in the `WHERE` clause, so concurrent readers never see
//! a half-applied checkpoint and no read-modify-write happens in Rust.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;
use tracing::instrument;
use uuid::Uuid;

use super::{JobStore, StoreError, StoreResult};
use crate::jobs::types::{
    Job, JobFilter, JobParams, JobStatus, NewJob, OwnerScope, RowError, TransitionFields,
};

const TERMINAL_SQL: &str = "('completed', 'failed', 'cancelled')";

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    kind: String,
    resource: String,
    status: String,
    owner_id: Uuid,
    params: serde_json::Value,
    input_ref: Option<String>,
    output_ref: Option<String>,
    output_size: Option<i64>,
    total_rows: Option<i64>,
    processed_rows: i64,
    success_count: i64,
    failed_count: i64,
    cancel_requested: bool,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |what: String| StoreError::Corrupt(format!("job {}: {}", row.id, what));
        Ok(Job {
            id: row.id,
            kind: row.kind.parse().map_err(|e| corrupt(format!("{}", e)))?,
            resource: row.resource.parse().map_err(|e| corrupt(format!("{}", e)))?,
            status: row.status.parse().map_err(corrupt)?,
            owner_id: row.owner_id,
            params: serde_json::from_value::<JobParams>(row.params.clone())
                .map_err(|e| corrupt(format!("invalid params: {}", e)))?,
            input_ref: row.input_ref,
            output_ref: row.output_ref,
            output_size: row.output_size,
            total_rows: row.total_rows,
            processed_rows: row.processed_rows,
            success_count: row.success_count,
            failed_count: row.failed_count,
            cancel_requested: row.cancel_requested,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            expires_at: row.expires_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RowErrorRow {
    job_id: Uuid,
    row_number: i64,
    field: Option<String>,
    message: String,
    raw_row: serde_json::Value,
}

impl From<RowErrorRow> for RowError {
    fn from(row: RowErrorRow) -> Self {
        RowError {
            job_id: row.job_id,
            row_number: row.row_number,
            field: row.field,
            message: row.message,
            raw_row: row.raw_row,
        }
    }
}

#[derive(Debug, FromRow)]
struct StatusRow {
    status: String,
    total_rows: Option<i64>,
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn status_of(conn: &mut PgConnection, id: Uuid) -> StoreResult<(JobStatus, Option<i64>)> {
        let row: Option<StatusRow> =
            sqlx::query_as("SELECT status, total_rows FROM bulk_jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;
        let row = row.ok_or(StoreError::NotFound(id))?;
        let status = row.status.parse().map_err(StoreError::Corrupt)?;
        Ok((status, row.total_rows))
    }

    async fn bump_in(conn: &mut PgConnection, id: Uuid, success: i64, failed: i64) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_jobs
            SET processed_rows = processed_rows + $2 + $3,
                success_count = success_count + $2,
                failed_count = failed_count + $3
            WHERE id = $1
              AND status = 'processing'
              AND (total_rows IS NULL OR processed_rows + $2 + $3 <= total_rows)
            "#,
        )
        .bind(id)
        .bind(success)
        .bind(failed)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match Self::status_of(conn, id).await? {
            (JobStatus::Processing, Some(total)) => Err(StoreError::ProgressOverflow { job_id: id, total }),
            (status, _) => Err(StoreError::NotRunning { job_id: id, status }),
        }
    }

    async fn append_in(conn: &mut PgConnection, id: Uuid, errors: &[RowError]) -> StoreResult<()> {
        // Lock the job row so a concurrent terminal transition cannot slip in
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM bulk_jobs WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;
        let status: JobStatus = status
            .ok_or(StoreError::NotFound(id))?
            .parse()
            .map_err(StoreError::Corrupt)?;
        if !status.is_running() {
            return Err(StoreError::NotRunning { job_id: id, status });
        }

        let mut seen = HashSet::with_capacity(errors.len());
        for error in errors {
            if !seen.insert(error.row_number) {
                return Err(StoreError::DuplicateRowError {
                    job_id: id,
                    row_number: error.row_number,
                });
            }
        }

        let numbers: Vec<i64> = errors.iter().map(|e| e.row_number).collect();
        let taken: Option<i64> = sqlx::query_scalar(
            "SELECT MIN(row_number) FROM bulk_job_row_errors WHERE job_id = $1 AND row_number = ANY($2)",
        )
        .bind(id)
        .bind(&numbers)
        .fetch_one(&mut *conn)
        .await?;
        if let Some(row_number) = taken {
            return Err(StoreError::DuplicateRowError { job_id: id, row_number });
        }

        for chunk in errors.chunks(1000) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO bulk_job_row_errors (job_id, row_number, field, message, raw_row) ",
            );
            qb.push_values(chunk, |mut b, error| {
                b.push_bind(id)
                    .push_bind(error.row_number)
                    .push_bind(error.field.as_deref())
                    .push_bind(error.message.as_str())
                    .push_bind(&error.raw_row);
            });
            qb.build().execute(&mut *conn).await?;
        }

        Ok(())
    }

    fn push_scope(qb: &mut QueryBuilder<'_, Postgres>, scope: OwnerScope, filter: &JobFilter) {
        qb.push(" WHERE TRUE");
        if let Some(owner) = scope.owner_id() {
            qb.push(" AND owner_id = ").push_bind(owner);
        }
        if let Some(kind) = filter.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, resource = %job.resource))]
    async fn create(&self, job: NewJob) -> StoreResult<Job> {
        let params = serde_json::to_value(&job.params)
            .map_err(|e| StoreError::Corrupt(format!("unserializable params: {}", e)))?;

        let row: JobRow = sqlx::query_as(
            r#"
            INSERT INTO bulk_jobs (id, kind, resource, status, owner_id, params, input_ref)
            VALUES ($1, $2, $3, 'pending', $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(job.params.kind().as_str())
        .bind(job.resource.as_str())
        .bind(job.owner_id)
        .bind(params)
        .bind(job.input_ref)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get(&self, id: Uuid, scope: OwnerScope) -> StoreResult<Job> {
        let row: Option<JobRow> = sqlx::query_as(
            "SELECT * FROM bulk_jobs WHERE id = $1 AND ($2::uuid IS NULL OR owner_id = $2)",
        )
        .bind(id)
        .bind(scope.owner_id())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(StoreError::NotFound(id))?.try_into()
    }

    async fn list(&self, scope: OwnerScope, filter: &JobFilter) -> StoreResult<(Vec<Job>, i64)> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM bulk_jobs");
        Self::push_scope(&mut count_qb, scope, filter);
        let total: i64 = count_qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new("SELECT * FROM bulk_jobs");
        Self::push_scope(&mut qb, scope, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let rows = qb.build_query_as::<JobRow>().fetch_all(&self.pool).await?;
        let jobs = rows.into_iter().map(Job::try_from).collect::<StoreResult<Vec<_>>>()?;
        Ok((jobs, total))
    }

    #[instrument(skip(self, fields), fields(job_id = %id, to = %to))]
    async fn transition(
        &self,
        id: Uuid,
        to: JobStatus,
        fields: TransitionFields,
    ) -> StoreResult<Job> {
        let sources: Vec<String> = JobStatus::sources_of(to)
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE bulk_jobs
            SET status = $2,
                started_at = COALESCE($3, started_at),
                completed_at = COALESCE($4, completed_at),
                expires_at = COALESCE($5, expires_at),
                total_rows = COALESCE($6, total_rows),
                output_ref = COALESCE($7, output_ref),
                output_size = COALESCE($8, output_size),
                error_message = COALESCE($9, error_message)
            WHERE id = $1 AND status = ANY($10)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(fields.started_at)
        .bind(fields.completed_at)
        .bind(fields.expires_at)
        .bind(fields.total_rows)
        .bind(fields.output_ref)
        .bind(fields.output_size)
        .bind(fields.error_message)
        .bind(&sources)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let mut conn = self.pool.acquire().await?;
                let (from, _) = Self::status_of(&mut conn, id).await?;
                Err(StoreError::InvalidTransition { job_id: id, from, to })
            },
        }
    }

    async fn bump_progress(&self, id: Uuid, success: i64, failed: i64) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        Self::bump_in(&mut conn, id, success, failed).await
    }

    async fn append_errors(&self, id: Uuid, errors: &[RowError]) -> StoreResult<()> {
        if errors.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        Self::append_in(&mut tx, id, errors).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, errors), fields(job_id = %id, errors = errors.len()))]
    async fn record_checkpoint(
        &self,
        id: Uuid,
        success: i64,
        failed: i64,
        errors: &[RowError],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        if !errors.is_empty() {
            Self::append_in(&mut tx, id, errors).await?;
        }
        if success != 0 || failed != 0 {
            Self::bump_in(&mut tx, id, success, failed).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_errors(&self, id: Uuid, scope: OwnerScope) -> StoreResult<Vec<RowError>> {
        // Resolves ownership before exposing any rows
        self.get(id, scope).await?;

        let rows: Vec<RowErrorRow> = sqlx::query_as(
            r#"
            SELECT job_id, row_number, field, message, raw_row
            FROM bulk_job_row_errors
            WHERE job_id = $1
            ORDER BY row_number
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RowError::from).collect())
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn mark_cancel_requested(&self, id: Uuid, scope: OwnerScope) -> StoreResult<Job> {
        let sql = format!(
            r#"
            UPDATE bulk_jobs
            SET cancel_requested = TRUE
            WHERE id = $1
              AND ($2::uuid IS NULL OR owner_id = $2)
              AND status NOT IN {}
            RETURNING *
            "#,
            TERMINAL_SQL
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(scope.owner_id())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let job = self.get(id, scope).await?;
                Err(StoreError::TerminalState {
                    job_id: id,
                    status: job.status,
                })
            },
        }
    }

    async fn is_cancel_requested(&self, id: Uuid) -> StoreResult<bool> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM bulk_jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        flag.ok_or(StoreError::NotFound(id))
    }

    async fn ids_with_status(&self, status: JobStatus) -> StoreResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar("SELECT id FROM bulk_jobs WHERE status = $1 ORDER BY created_at")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Job>> {
        let sql = format!(
            "SELECT * FROM bulk_jobs WHERE status IN {} AND expires_at < $1 ORDER BY expires_at LIMIT $2",
            TERMINAL_SQL
        );
        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM bulk_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::jobs::types::Resource;

    fn new_job() -> NewJob {
        NewJob::import(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Resource::Wards,
            "wards.csv",
            true,
            "imports/x/wards.csv",
        )
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires PostgreSQL"]
    async fn test_transition_compare_and_set(pool: PgPool) {
        let store = PgJobStore::new(pool);
        let job = store.create(new_job()).await.unwrap();

        store
            .transition(job.id, JobStatus::Validating, TransitionFields::default())
            .await
            .unwrap();
        let second = store
            .transition(job.id, JobStatus::Validating, TransitionFields::default())
            .await;
        assert!(matches!(
            second,
            Err(StoreError::InvalidTransition {
                from: JobStatus::Validating,
                ..
            })
        ));
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires PostgreSQL"]
    async fn test_checkpoint_respects_total(pool: PgPool) {
        let store = PgJobStore::new(pool);
        let job = store.create(new_job()).await.unwrap();
        store
            .transition(job.id, JobStatus::Validating, TransitionFields::default())
            .await
            .unwrap();
        store
            .transition(
                job.id,
                JobStatus::Processing,
                TransitionFields {
                    total_rows: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let error = RowError::new(job.id, 2, None, "bad", serde_json::json!({}));
        store.record_checkpoint(job.id, 1, 1, &[error.clone()]).await.unwrap();

        assert!(matches!(
            store.bump_progress(job.id, 1, 0).await,
            Err(StoreError::ProgressOverflow { total: 2, .. })
        ));
        assert!(matches!(
            store.append_error(job.id, error).await,
            Err(StoreError::DuplicateRowError { row_number: 2, .. })
        ));

        let job = store.get(job.id, OwnerScope::Any).await.unwrap();
        assert_eq!((job.processed_rows, job.success_count, job.failed_count), (2, 1, 1));
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires PostgreSQL"]
    async fn test_cancel_scoped_to_owner(pool: PgPool) {
        let store = PgJobStore::new(pool);
        let job = store.create(new_job()).await.unwrap();

        assert!(matches!(
            store
                .mark_cancel_requested(job.id, OwnerScope::Owner(Uuid::new_v4()))
                .await,
            Err(StoreError::NotFound(_))
        ));
        let job = store
            .mark_cancel_requested(job.id, OwnerScope::Owner(job.owner_id))
            .await
            .unwrap();
        assert!(job.cancel_requested);
        assert_eq!(job.status, JobStatus::Pending);
    }
}
