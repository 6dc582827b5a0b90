//! End-to-end runs of the job pipeline against in-memory collaborators
//!
//! Each test drives a job from `pending` to a terminal state through the
//! runner and checks the counters, row errors and artifacts it leaves behind.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use common::{assert_counters_consistent, user_rows, TestEnv};
use fieldops_server::features::jobs::queries::{
    download_artifact, DownloadArtifactError, DownloadArtifactQuery,
};
use fieldops_server::features::FeatureState;
use fieldops_server::jobs::processor::{
    ApplyOutcome, CollaboratorError, EntityWrite, EntityWriter,
};
use fieldops_server::jobs::types::{ExportFormat, Resource};
use fieldops_server::jobs::{
    ExpiryReaper, JobStatus, JobStore, NewJob, OwnerScope, RunOutcome, RunnerSettings, StoreError,
    TaskQueue, WorkerPool,
};
use fieldops_server::storage::ArtifactStore;

#[tokio::test]
async fn test_import_isolates_bad_reference_row() {
    let env = TestEnv::new().await;
    let csv = "name,email,role,district_code\n\
               Asha,asha@example.org,volunteer,KA-BLR\n\
               Ravi,ravi@example.org,analyst,KA-MYS\n\
               Meera,meera@example.org,viewer,KA-BLR\n\
               Kiran,kiran@example.org,volunteer,KA-XYZ\n";
    let job = env.submit_import(Resource::Users, csv).await;

    assert_eq!(env.runner().run(job.id).await.unwrap(), RunOutcome::Completed);

    let job = env.job(job.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_rows, Some(4));
    assert_eq!((job.processed_rows, job.success_count, job.failed_count), (4, 3, 1));
    assert_counters_consistent(&job);

    let errors = env.store.list_errors(job.id, OwnerScope::Owner(env.owner)).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].row_number, 4);
    assert_eq!(errors[0].field.as_deref(), Some("district_code"));
    assert_eq!(errors[0].raw_row["email"], json!("kiran@example.org"));
    assert_eq!(env.entities.count(Resource::Users).await, 3);
}

#[tokio::test]
async fn test_import_missing_required_column_fails_without_rows() {
    let env = TestEnv::new().await;
    let job = env
        .submit_import(Resource::Wards, "name,constituency_code\nJayanagar,KA-AC-150\n")
        .await;

    assert_eq!(env.runner().run(job.id).await.unwrap(), RunOutcome::Failed);

    let job = env.job(job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!((job.processed_rows, job.success_count, job.failed_count), (0, 0, 0));
    assert!(job.error_message.as_deref().unwrap().contains("code"));
    assert!(env.store.list_errors(job.id, OwnerScope::Any).await.unwrap().is_empty());
    assert_eq!(env.entities.count(Resource::Wards).await, 0);
}

/// Raises the job's cancel flag while applying a given row
struct CancelAtRow {
    inner: Arc<dyn EntityWriter>,
    store: Arc<dyn JobStore>,
    job_id: Uuid,
    row: i64,
}

#[async_trait]
impl EntityWriter for CancelAtRow {
    async fn apply(
        &self,
        write: &EntityWrite,
        update_existing: bool,
    ) -> Result<ApplyOutcome, CollaboratorError> {
        if write.row_number == self.row {
            self.store
                .mark_cancel_requested(self.job_id, OwnerScope::Any)
                .await
                .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        }
        self.inner.apply(write, update_existing).await
    }
}

#[tokio::test]
async fn test_cancel_mid_processing_stops_at_checkpoint() {
    let env = TestEnv::new().await;
    let job = env.submit_import(Resource::Users, &user_rows(200)).await;

    let writer = Arc::new(CancelAtRow {
        inner: env.entities.clone(),
        store: env.store.clone(),
        job_id: job.id,
        row: 50,
    });

    let checkpoint_rows = 10;
    let settings = RunnerSettings {
        checkpoint_rows,
        checkpoint_interval: Duration::from_secs(60),
        ..RunnerSettings::default()
    };
    let runner = env.runner_with(writer, settings);

    assert_eq!(runner.run(job.id).await.unwrap(), RunOutcome::Cancelled);

    let cancelled = env.job(job.id).await;
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.cancel_requested);
    assert!(cancelled.processed_rows >= 50);
    assert!(cancelled.processed_rows <= 50 + checkpoint_rows as i64);
    assert_counters_consistent(&cancelled);
    assert_eq!(env.entities.count(Resource::Users).await as i64, cancelled.success_count);

    // A second invocation must not touch the job again
    assert_eq!(
        runner.run(job.id).await.unwrap(),
        RunOutcome::Skipped(JobStatus::Cancelled)
    );
    let again = env.job(job.id).await;
    assert_eq!(again.processed_rows, cancelled.processed_rows);
    assert_eq!(again.completed_at, cancelled.completed_at);
}

#[tokio::test]
async fn test_expired_export_is_gone_then_reaped() {
    let env = TestEnv::new().await;
    for id in 1..=3 {
        env.records
            .insert(
                Resource::Wards,
                json!({
                    "id": id,
                    "name": format!("Ward {id}"),
                    "code": format!("KA-AC-150-W-00{id}"),
                    "constituency_code": "KA-AC-150",
                }),
            )
            .await
            .unwrap();
    }

    let job = env
        .store
        .create(NewJob::export(
            Uuid::new_v4(),
            env.owner,
            Resource::Wards,
            ExportFormat::Csv,
            BTreeMap::new(),
            vec!["id".into(), "code".into()],
        ))
        .await
        .unwrap();
    assert_eq!(env.runner().run(job.id).await.unwrap(), RunOutcome::Completed);

    let job = env.job(job.id).await;
    assert_eq!((job.total_rows, job.processed_rows), (Some(3), 3));
    let output_ref = job.output_ref.clone().expect("completed export has an artifact");

    let mut body = String::new();
    env.artifacts
        .open(&output_ref)
        .await
        .unwrap()
        .read_to_string(&mut body)
        .await
        .unwrap();
    assert_eq!(body.lines().collect::<Vec<_>>()[0], "id,code");
    assert_eq!(body.lines().count(), 4);

    let (queue, _receiver) = TaskQueue::channel(4);
    let state = FeatureState::new(env.store.clone(), env.artifacts.clone(), queue, 1024);

    let link = download_artifact::handle(
        &state,
        DownloadArtifactQuery {
            job_id: job.id,
            scope: OwnerScope::Owner(env.owner),
            now: Utc::now(),
        },
    )
    .await
    .unwrap();
    assert_eq!(link.row_count, 3);
    assert!(link.file_name.ends_with(".csv"));

    let after_expiry = job.expires_at.unwrap() + chrono::Duration::seconds(1);
    let gone = download_artifact::handle(
        &state,
        DownloadArtifactQuery {
            job_id: job.id,
            scope: OwnerScope::Owner(env.owner),
            now: after_expiry,
        },
    )
    .await;
    assert!(matches!(gone, Err(DownloadArtifactError::Expired(_))));

    let reaper = ExpiryReaper::new(env.store.clone(), env.artifacts.clone(), Duration::from_secs(60));
    let stats = reaper.sweep(after_expiry).await.unwrap();
    assert_eq!(stats.jobs_removed, 1);
    assert_eq!(stats.artifacts_removed, 1);
    assert!(matches!(
        env.store.get(job.id, OwnerScope::Any).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(env.artifacts.open(&output_ref).await.is_err());
}

#[tokio::test]
async fn test_update_existing_switches_between_reject_and_update() {
    let env = TestEnv::new().await;
    let csv = "name,code,constituency_code,population,voter_count\n\
               Jayanagar,KA-AC-150-W-001,KA-AC-150,52000,38000\n";

    let first = env.submit_import(Resource::Wards, csv).await;
    env.runner().run(first.id).await.unwrap();
    assert_eq!(env.job(first.id).await.success_count, 1);

    let second = env.submit_import(Resource::Wards, csv).await;
    env.runner().run(second.id).await.unwrap();
    let second = env.job(second.id).await;
    assert_eq!((second.success_count, second.failed_count), (0, 1));

    let id = Uuid::new_v4();
    let key = fieldops_server::storage::import_key(id, "wards.csv");
    env.artifacts.put_bytes(&key, csv.as_bytes().to_vec(), "text/csv").await.unwrap();
    let third = env
        .store
        .create(NewJob::import(id, env.owner, Resource::Wards, "wards.csv", true, key))
        .await
        .unwrap();
    env.runner().run(third.id).await.unwrap();
    let third = env.job(third.id).await;
    assert_eq!((third.success_count, third.failed_count), (1, 0));
    assert_eq!(env.entities.count(Resource::Wards).await, 1);
}

/// Panics while applying a given row
struct PanicAtRow {
    inner: Arc<dyn EntityWriter>,
    row: i64,
}

#[async_trait]
impl EntityWriter for PanicAtRow {
    async fn apply(
        &self,
        write: &EntityWrite,
        update_existing: bool,
    ) -> Result<ApplyOutcome, CollaboratorError> {
        if write.row_number == self.row {
            panic!("writer crashed at row {}", self.row);
        }
        self.inner.apply(write, update_existing).await
    }
}

#[tokio::test]
async fn test_panicking_job_is_failed_by_worker_pool() {
    let env = TestEnv::new().await;
    let crashing = env.submit_import(Resource::Users, &user_rows(5)).await;

    let writer = Arc::new(PanicAtRow {
        inner: env.entities.clone(),
        row: 3,
    });
    let runner = Arc::new(env.runner_with(writer, RunnerSettings::default()));

    let (queue, receiver) = TaskQueue::channel(4);
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::spawn(runner, receiver, 1, shutdown.clone());
    queue.enqueue(crashing.id).unwrap();

    let failed = env.wait_terminal(crashing.id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    let message = failed.error_message.as_deref().unwrap();
    assert!(message.starts_with("Job aborted unexpectedly"), "{message}");
    assert!(message.contains("writer crashed at row 3"), "{message}");
    assert!(failed.completed_at.is_some());
    assert!(failed.expires_at.is_some());

    // the pool keeps serving after the panic
    let healthy = env.submit_import(Resource::Users, &user_rows(2)).await;
    queue.enqueue(healthy.id).unwrap();
    assert_eq!(env.wait_terminal(healthy.id).await.status, JobStatus::Completed);

    shutdown.cancel();
    pool.await.unwrap();
}
