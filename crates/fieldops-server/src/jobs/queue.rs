//! Task queue and worker pool
//!
//! Submissions push job ids into a bounded channel; the [`WorkerPool`] pulls
//! them and runs at most `workers` jobs at once. HTTP handlers never wait on
//! a job.

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::runner::{JobRunner, RunOutcome};
use super::store::{JobStore, StoreError};
use super::types::{JobStatus, TransitionFields};

/// Message recorded on jobs a previous process left running
pub const INTERRUPTED_MESSAGE: &str = "interrupted by server restart";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Job queue is full")]
    Full,

    #[error("Job queue is closed")]
    Closed,
}

/// Sending half of the job queue
#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<Uuid>,
}

impl TaskQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Uuid>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queue a job without waiting for capacity
    pub fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.sender.try_send(job_id).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })?;
        debug!(job_id = %job_id, "Job enqueued");
        Ok(())
    }

    /// Queue a job, waiting for capacity
    pub async fn enqueue_wait(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.sender.send(job_id).await.map_err(|_| QueueError::Closed)
    }
}

/// Something that can execute one queued job
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job_id: Uuid);

    /// Called after `execute` panicked for `job_id`
    async fn abandon(&self, job_id: Uuid, reason: String) {
        warn!(job_id = %job_id, reason = %reason, "Abandoned job left as is");
    }
}

#[async_trait]
impl JobExecutor for JobRunner {
    async fn execute(&self, job_id: Uuid) {
        match self.run(job_id).await {
            Ok(RunOutcome::Skipped(status)) => {
                debug!(job_id = %job_id, status = %status, "Queued job was not pending")
            },
            Ok(outcome) => debug!(job_id = %job_id, outcome = ?outcome, "Job finished"),
            Err(e) => error!(job_id = %job_id, error = %e, "Job runner failed"),
        }
    }

    async fn abandon(&self, job_id: Uuid, reason: String) {
        match self.fail_abandoned(job_id, &reason).await {
            Ok(Some(status)) => info!(job_id = %job_id, status = %status, "Abandoned job marked failed"),
            Ok(None) => warn!(job_id = %job_id, "Abandoned job could not be failed from its current state"),
            Err(e) => error!(job_id = %job_id, error = %e, "Failed to mark abandoned job"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

pub struct WorkerPool;

impl WorkerPool {
    /// Dispatch queued jobs until `shutdown` fires or every sender is gone,
    /// then wait for jobs already started.
    pub fn spawn(
        executor: Arc<dyn JobExecutor>,
        mut receiver: mpsc::Receiver<Uuid>,
        workers: usize,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let workers = workers.max(1);
        tokio::spawn(async move {
            info!(workers, "Job worker pool started");
            let semaphore = Arc::new(Semaphore::new(workers));
            let mut running = JoinSet::new();

            loop {
                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                let job_id = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = receiver.recv() => match next {
                        Some(job_id) => job_id,
                        None => break,
                    },
                };

                let executor = executor.clone();
                running.spawn(async move {
                    let outcome = AssertUnwindSafe(executor.execute(job_id)).catch_unwind().await;
                    if let Err(payload) = outcome {
                        let reason = panic_message(payload.as_ref());
                        error!(job_id = %job_id, reason = %reason, "Job task panicked");
                        executor.abandon(job_id, reason).await;
                    }
                    drop(permit);
                });

                while let Some(done) = running.try_join_next() {
                    if let Err(e) = done {
                        error!(error = %e, "Job task ended abnormally");
                    }
                }
            }

            if !running.is_empty() {
                info!(running = running.len(), "Waiting for running jobs");
            }
            while let Some(done) = running.join_next().await {
                if let Err(e) = done {
                    error!(error = %e, "Job task ended abnormally");
                }
            }
            info!("Job worker pool stopped");
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    pub requeued: usize,
    pub interrupted: usize,
}

/// Resume after a restart: pending jobs go back on the queue, jobs that
/// were mid-run are failed.
pub async fn recover(
    store: &dyn JobStore,
    queue: &TaskQueue,
    retention: chrono::Duration,
) -> Result<RecoveryStats, StoreError> {
    let mut stats = RecoveryStats::default();

    for status in [JobStatus::Validating, JobStatus::Processing] {
        for job_id in store.ids_with_status(status).await? {
            let fields =
                TransitionFields::finished(Utc::now(), retention).with_error(INTERRUPTED_MESSAGE);
            match store.transition(job_id, JobStatus::Failed, fields).await {
                Ok(_) => stats.interrupted += 1,
                Err(StoreError::InvalidTransition { from, .. }) => {
                    debug!(job_id = %job_id, status = %from, "Job moved on during recovery")
                },
                Err(e) => return Err(e),
            }
        }
    }

    for job_id in store.ids_with_status(JobStatus::Pending).await? {
        if let Err(e) = queue.enqueue_wait(job_id).await {
            warn!(job_id = %job_id, error = %e, "Could not requeue pending job");
            break;
        }
        stats.requeued += 1;
    }

    if stats.requeued > 0 || stats.interrupted > 0 {
        info!(
            requeued = stats.requeued,
            interrupted = stats.interrupted,
            "Recovered jobs from previous run"
        );
    }
    Ok(stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::jobs::store::MemoryJobStore;
    use crate::jobs::types::{NewJob, OwnerScope, Resource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Uuid>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobExecutor for Recorder {
        async fn execute(&self, job_id: Uuid) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.seen.lock().await.push(job_id);
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Exploding {
        abandoned: Mutex<Vec<(Uuid, String)>>,
    }

    #[async_trait]
    impl JobExecutor for Exploding {
        async fn execute(&self, job_id: Uuid) {
            panic!("executor blew up on {}", job_id);
        }

        async fn abandon(&self, job_id: Uuid, reason: String) {
            self.abandoned.lock().await.push((job_id, reason));
        }
    }

    #[tokio::test]
    async fn test_panicking_job_is_abandoned_and_pool_keeps_going() {
        let (queue, receiver) = TaskQueue::channel(4);
        let exploding = Arc::new(Exploding::default());
        let ids = [Uuid::new_v4(), Uuid::new_v4()];
        for id in ids {
            queue.enqueue(id).unwrap();
        }
        drop(queue);

        WorkerPool::spawn(exploding.clone(), receiver, 1, CancellationToken::new())
            .await
            .unwrap();

        let abandoned = exploding.abandoned.lock().await;
        assert_eq!(abandoned.len(), 2);
        assert_eq!(abandoned[0].0, ids[0]);
        assert_eq!(abandoned[0].1, format!("executor blew up on {}", ids[0]));
    }

    #[test]
    fn test_enqueue_reports_full_and_closed() {
        let (queue, receiver) = TaskQueue::channel(1);
        queue.enqueue(Uuid::new_v4()).unwrap();
        assert_eq!(queue.enqueue(Uuid::new_v4()), Err(QueueError::Full));

        drop(receiver);
        assert_eq!(queue.enqueue(Uuid::new_v4()), Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_pool_runs_every_job_within_worker_bound() {
        let (queue, receiver) = TaskQueue::channel(16);
        let recorder = Arc::new(Recorder::default());
        let ids: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.enqueue(*id).unwrap();
        }
        drop(queue);

        let handle = WorkerPool::spawn(recorder.clone(), receiver, 3, CancellationToken::new());
        handle.await.unwrap();

        let mut seen = recorder.seen.lock().await.clone();
        let mut expected = ids.clone();
        seen.sort();
        expected.sort();
        assert_eq!(seen, expected);
        assert!(recorder.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_pool_stops_on_shutdown() {
        let (_queue, receiver) = TaskQueue::channel(4);
        let shutdown = CancellationToken::new();
        let handle =
            WorkerPool::spawn(Arc::new(Recorder::default()), receiver, 2, shutdown.clone());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_recover_requeues_pending_and_fails_running() {
        let store = MemoryJobStore::new();
        let owner = Uuid::new_v4();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let job = store
                .create(NewJob::import(Uuid::new_v4(), owner, Resource::Users, "u.csv", false, "k"))
                .await
                .unwrap();
            ids.push(job.id);
        }
        store
            .transition(ids[1], JobStatus::Validating, TransitionFields::default())
            .await
            .unwrap();

        let (queue, mut receiver) = TaskQueue::channel(8);
        let stats = recover(&store, &queue, chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(stats, RecoveryStats { requeued: 2, interrupted: 1 });

        let interrupted = store.get(ids[1], OwnerScope::Any).await.unwrap();
        assert_eq!(interrupted.status, JobStatus::Failed);
        assert_eq!(interrupted.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert!(interrupted.expires_at.is_some());

        let mut requeued = vec![receiver.recv().await.unwrap(), receiver.recv().await.unwrap()];
        requeued.sort();
        let mut expected = vec![ids[0], ids[2]];
        expected.sort();
        assert_eq!(requeued, expected);
    }
}
