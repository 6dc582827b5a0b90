//! Shared fixtures for job pipeline integration tests
//!
//! Everything runs in-process: jobs live in [`MemoryJobStore`], artifacts in a
//! temporary directory and entities in the in-memory collaborators, so no
//! database or object store is needed.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use fieldops_server::entities::{MemoryEntityWriter, MemoryRecordSource, MemoryReferenceLookup};
use fieldops_server::jobs::processor::{EntityWriter, RendererRegistry};
use fieldops_server::jobs::reference::ReferenceKind;
use fieldops_server::jobs::types::{JobKind, Resource};
use fieldops_server::jobs::validator::Validator;
use fieldops_server::jobs::{
    Collaborators, Job, JobRunner, JobStatus, JobStore, MemoryJobStore, NewJob, OwnerScope,
    RunnerSettings,
};
use fieldops_server::storage::{import_key, ArtifactStore, LocalArtifactStore};

pub struct TestEnv {
    _dir: TempDir,
    pub store: Arc<MemoryJobStore>,
    pub artifacts: Arc<LocalArtifactStore>,
    pub entities: Arc<MemoryEntityWriter>,
    pub records: Arc<MemoryRecordSource>,
    pub owner: Uuid,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let artifacts = Arc::new(
            LocalArtifactStore::new(dir.path())
                .await
                .expect("Failed to create artifact store"),
        );
        Self {
            _dir: dir,
            store: Arc::new(MemoryJobStore::new()),
            artifacts,
            entities: Arc::new(MemoryEntityWriter::new()),
            records: Arc::new(MemoryRecordSource::new()),
            owner: Uuid::new_v4(),
        }
    }

    /// Codes every fixture CSV may reference
    pub fn references() -> MemoryReferenceLookup {
        MemoryReferenceLookup::new()
            .with(ReferenceKind::State, "KA", 1)
            .with(ReferenceKind::District, "KA-BLR", 10)
            .with(ReferenceKind::District, "KA-MYS", 11)
            .with(ReferenceKind::Constituency, "KA-AC-150", 150)
    }

    pub fn collaborators(&self, entities: Arc<dyn EntityWriter>) -> Collaborators {
        Collaborators {
            entities,
            references: Arc::new(Self::references()),
            records: self.records.clone(),
            renderers: RendererRegistry::with_defaults(),
        }
    }

    pub fn runner_with(&self, entities: Arc<dyn EntityWriter>, settings: RunnerSettings) -> JobRunner {
        JobRunner::new(
            self.store.clone(),
            self.artifacts.clone(),
            Arc::new(Validator::new().expect("Validator patterns must compile")),
            self.collaborators(entities),
            settings,
        )
    }

    pub fn runner(&self) -> JobRunner {
        self.runner_with(self.entities.clone(), RunnerSettings::default())
    }

    /// Upload `csv` and record a pending import owned by [`TestEnv::owner`]
    pub async fn submit_import(&self, resource: Resource, csv: &str) -> Job {
        let id = Uuid::new_v4();
        let key = import_key(id, "upload.csv");
        self.artifacts
            .put_bytes(&key, csv.as_bytes().to_vec(), "text/csv")
            .await
            .expect("Failed to store upload");
        self.store
            .create(NewJob::import(id, self.owner, resource, "upload.csv", false, key))
            .await
            .expect("Failed to create job")
    }

    pub async fn job(&self, id: Uuid) -> Job {
        self.store.get(id, OwnerScope::Any).await.expect("Job should exist")
    }

    /// Poll until the job reaches a terminal state
    pub async fn wait_terminal(&self, id: Uuid) -> Job {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let job = self.job(id).await;
                if job.status.is_terminal() {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Job did not finish in time")
    }
}

/// Users CSV with `count` valid rows
pub fn user_rows(count: usize) -> String {
    let mut csv = String::from("name,email,role,district_code\n");
    for i in 1..=count {
        csv.push_str(&format!("User {i},user{i}@example.org,volunteer,KA-BLR\n"));
    }
    csv
}

pub fn assert_counters_consistent(job: &Job) {
    assert_eq!(
        job.success_count + job.failed_count,
        job.processed_rows,
        "success + failed must equal processed"
    );
    if let Some(total) = job.total_rows {
        assert!(job.processed_rows <= total, "processed exceeds total");
    }
    if job.status == JobStatus::Completed && job.kind == JobKind::Import {
        assert_eq!(Some(job.processed_rows), job.total_rows);
    }
}
