//! In-process job store used by tests and single-node development runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{JobStore, StoreError, StoreResult};
use crate::jobs::types::{
    Job, JobFilter, JobStatus, NewJob, OwnerScope, RowError, TransitionFields,
};

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    errors: HashMap<Uuid, BTreeMap<i64, RowError>>,
}

impl State {
    fn job(&self, id: Uuid) -> StoreResult<&Job> {
        self.jobs.get(&id).ok_or(StoreError::NotFound(id))
    }

    fn job_mut(&mut self, id: Uuid) -> StoreResult<&mut Job> {
        self.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))
    }

    fn check_progress(&self, id: Uuid, success: i64, failed: i64) -> StoreResult<()> {
        let job = self.job(id)?;
        if job.status != JobStatus::Processing {
            return Err(StoreError::NotRunning {
                job_id: id,
                status: job.status,
            });
        }
        if let Some(total) = job.total_rows {
            if job.processed_rows + success + failed > total {
                return Err(StoreError::ProgressOverflow { job_id: id, total });
            }
        }
        Ok(())
    }

    fn check_errors(&self, id: Uuid, errors: &[RowError]) -> StoreResult<()> {
        let job = self.job(id)?;
        if !job.status.is_running() {
            return Err(StoreError::NotRunning {
                job_id: id,
                status: job.status,
            });
        }
        let existing = self.errors.get(&id);
        let mut batch = std::collections::HashSet::new();
        for error in errors {
            let taken = existing.is_some_and(|e| e.contains_key(&error.row_number));
            if taken || !batch.insert(error.row_number) {
                return Err(StoreError::DuplicateRowError {
                    job_id: id,
                    row_number: error.row_number,
                });
            }
        }
        Ok(())
    }

    fn apply_progress(&mut self, id: Uuid, success: i64, failed: i64) -> StoreResult<()> {
        let job = self.job_mut(id)?;
        job.success_count += success;
        job.failed_count += failed;
        job.processed_rows += success + failed;
        Ok(())
    }

    fn apply_errors(&mut self, id: Uuid, errors: &[RowError]) {
        let entry = self.errors.entry(id).or_default();
        for error in errors {
            entry.insert(error.row_number, error.clone());
        }
    }
}

/// Job store backed by a mutex-guarded map
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<State>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob) -> StoreResult<Job> {
        let job = job.into_job(Utc::now());
        let mut state = self.state.lock().await;
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid, scope: OwnerScope) -> StoreResult<Job> {
        let state = self.state.lock().await;
        match state.jobs.get(&id) {
            Some(job) if scope.permits(job.owner_id) => Ok(job.clone()),
            _ => Err(StoreError::NotFound(id)),
        }
    }

    async fn list(&self, scope: OwnerScope, filter: &JobFilter) -> StoreResult<(Vec<Job>, i64)> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| scope.permits(j.owner_id))
            .filter(|j| filter.kind.is_none_or(|k| j.kind == k))
            .filter(|j| filter.status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = jobs.len() as i64;
        let page = jobs
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn transition(
        &self,
        id: Uuid,
        to: JobStatus,
        fields: TransitionFields,
    ) -> StoreResult<Job> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        if !job.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                job_id: id,
                from: job.status,
                to,
            });
        }
        job.status = to;
        fields.apply_to(job);
        Ok(job.clone())
    }

    async fn bump_progress(&self, id: Uuid, success: i64, failed: i64) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.check_progress(id, success, failed)?;
        state.apply_progress(id, success, failed)
    }

    async fn append_errors(&self, id: Uuid, errors: &[RowError]) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.check_errors(id, errors)?;
        state.apply_errors(id, errors);
        Ok(())
    }

    async fn record_checkpoint(
        &self,
        id: Uuid,
        success: i64,
        failed: i64,
        errors: &[RowError],
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.check_errors(id, errors)?;
        state.check_progress(id, success, failed)?;
        state.apply_errors(id, errors);
        state.apply_progress(id, success, failed)
    }

    async fn list_errors(&self, id: Uuid, scope: OwnerScope) -> StoreResult<Vec<RowError>> {
        let state = self.state.lock().await;
        match state.jobs.get(&id) {
            Some(job) if scope.permits(job.owner_id) => Ok(state
                .errors
                .get(&id)
                .map(|e| e.values().cloned().collect())
                .unwrap_or_default()),
            _ => Err(StoreError::NotFound(id)),
        }
    }

    async fn mark_cancel_requested(&self, id: Uuid, scope: OwnerScope) -> StoreResult<Job> {
        let mut state = self.state.lock().await;
        let job = match state.jobs.get_mut(&id) {
            Some(job) if scope.permits(job.owner_id) => job,
            _ => return Err(StoreError::NotFound(id)),
        };
        if job.status.is_terminal() {
            return Err(StoreError::TerminalState {
                job_id: id,
                status: job.status,
            });
        }
        job.cancel_requested = true;
        Ok(job.clone())
    }

    async fn is_cancel_requested(&self, id: Uuid) -> StoreResult<bool> {
        let state = self.state.lock().await;
        Ok(state.job(id)?.cancel_requested)
    }

    async fn ids_with_status(&self, status: JobStatus) -> StoreResult<Vec<Uuid>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<&Job> = state.jobs.values().filter(|j| j.status == status).collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs.into_iter().map(|j| j.id).collect())
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.status.is_terminal() && j.expires_at.is_some_and(|e| e < now))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.expires_at);
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        state.errors.remove(&id);
        Ok(state.jobs.remove(&id).is_some())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::jobs::types::Resource;
    use serde_json::json;

    fn import_job(owner: Uuid) -> NewJob {
        NewJob::import(
            Uuid::new_v4(),
            owner,
            Resource::Users,
            "users.csv",
            false,
            "imports/x/users.csv",
        )
    }

    async fn processing_job(store: &MemoryJobStore, total: i64) -> Job {
        let job = store.create(import_job(Uuid::new_v4())).await.unwrap();
        store
            .transition(job.id, JobStatus::Validating, TransitionFields::default())
            .await
            .unwrap();
        store
            .transition(
                job.id,
                JobStatus::Processing,
                TransitionFields {
                    total_rows: Some(total),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    fn row_error(job_id: Uuid, row: i64) -> RowError {
        RowError::new(job_id, row, Some("email".into()), "bad email", json!({"email": "x"}))
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let store = MemoryJobStore::new();
        let job = store.create(import_job(Uuid::new_v4())).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.processed_rows, 0);
        assert!(job.total_rows.is_none());
    }

    #[tokio::test]
    async fn test_get_hides_other_owners_jobs() {
        let store = MemoryJobStore::new();
        let owner = Uuid::new_v4();
        let job = store.create(import_job(owner)).await.unwrap();

        assert!(store.get(job.id, OwnerScope::Owner(owner)).await.is_ok());
        assert!(store.get(job.id, OwnerScope::Any).await.is_ok());
        assert!(matches!(
            store.get(job.id, OwnerScope::Owner(Uuid::new_v4())).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_transition_rejects_skipping_states() {
        let store = MemoryJobStore::new();
        let job = store.create(import_job(Uuid::new_v4())).await.unwrap();

        let err = store
            .transition(job.id, JobStatus::Completed, TransitionFields::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_terminal_job_is_frozen() {
        let store = MemoryJobStore::new();
        let job = processing_job(&store, 10).await;
        store.bump_progress(job.id, 2, 1).await.unwrap();
        store
            .transition(job.id, JobStatus::Completed, TransitionFields::default())
            .await
            .unwrap();

        assert!(store.bump_progress(job.id, 1, 0).await.is_err());
        assert!(store.append_error(job.id, row_error(job.id, 9)).await.is_err());
        assert!(store
            .transition(job.id, JobStatus::Cancelled, TransitionFields::default())
            .await
            .is_err());
        assert!(matches!(
            store.mark_cancel_requested(job.id, OwnerScope::Any).await,
            Err(StoreError::TerminalState { .. })
        ));

        let job = store.get(job.id, OwnerScope::Any).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_rows, 3);
        assert!(!job.cancel_requested);
    }

    #[tokio::test]
    async fn test_progress_cannot_exceed_total() {
        let store = MemoryJobStore::new();
        let job = processing_job(&store, 3).await;
        store.bump_progress(job.id, 2, 0).await.unwrap();

        let err = store.bump_progress(job.id, 1, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::ProgressOverflow { total: 3, .. }));

        let job = store.get(job.id, OwnerScope::Any).await.unwrap();
        assert_eq!(job.processed_rows, 2);
        assert_eq!(job.success_count + job.failed_count, job.processed_rows);
    }

    #[tokio::test]
    async fn test_progress_requires_processing() {
        let store = MemoryJobStore::new();
        let job = store.create(import_job(Uuid::new_v4())).await.unwrap();
        assert!(matches!(
            store.bump_progress(job.id, 1, 0).await,
            Err(StoreError::NotRunning {
                status: JobStatus::Pending,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_row_numbers_are_unique_per_job() {
        let store = MemoryJobStore::new();
        let job = processing_job(&store, 10).await;
        store.append_error(job.id, row_error(job.id, 4)).await.unwrap();

        let err = store.append_error(job.id, row_error(job.id, 4)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRowError { row_number: 4, .. }));

        let batch = [row_error(job.id, 5), row_error(job.id, 5)];
        assert!(store.append_errors(job.id, &batch).await.is_err());
        assert_eq!(store.list_errors(job.id, OwnerScope::Any).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_is_all_or_nothing() {
        let store = MemoryJobStore::new();
        let job = processing_job(&store, 2).await;

        let err = store
            .record_checkpoint(job.id, 2, 1, &[row_error(job.id, 3)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ProgressOverflow { .. }));
        assert!(store.list_errors(job.id, OwnerScope::Any).await.unwrap().is_empty());

        store
            .record_checkpoint(job.id, 1, 1, &[row_error(job.id, 2)])
            .await
            .unwrap();
        let job = store.get(job.id, OwnerScope::Any).await.unwrap();
        assert_eq!((job.processed_rows, job.success_count, job.failed_count), (2, 1, 1));
    }

    #[tokio::test]
    async fn test_cancel_flag_leaves_status() {
        let store = MemoryJobStore::new();
        let owner = Uuid::new_v4();
        let job = store.create(import_job(owner)).await.unwrap();

        assert!(matches!(
            store.mark_cancel_requested(job.id, OwnerScope::Owner(Uuid::new_v4())).await,
            Err(StoreError::NotFound(_))
        ));

        let job = store.mark_cancel_requested(job.id, OwnerScope::Owner(owner)).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(store.is_cancel_requested(job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_expired_only_terminal() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let running = processing_job(&store, 1).await;
        let done = processing_job(&store, 1).await;
        store
            .transition(
                done.id,
                JobStatus::Completed,
                TransitionFields::finished(now - chrono::Duration::hours(2), chrono::Duration::hours(1)),
            )
            .await
            .unwrap();

        let expired = store.list_expired(now, 10).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, done.id);
        assert_ne!(expired[0].id, running.id);

        assert!(store.delete(done.id).await.unwrap());
        assert!(!store.delete(done.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let store = MemoryJobStore::new();
        let owner = Uuid::new_v4();
        for _ in 0..3 {
            store.create(import_job(owner)).await.unwrap();
        }
        store.create(import_job(Uuid::new_v4())).await.unwrap();

        let filter = JobFilter {
            limit: 2,
            offset: 0,
            ..Default::default()
        };
        let (page, total) = store.list(OwnerScope::Owner(owner), &filter).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);

        let (_, total) = store.list(OwnerScope::Any, &filter).await.unwrap();
        assert_eq!(total, 4);
    }
}
