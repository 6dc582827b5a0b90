//! Expiry reaper
//!
//! Periodically removes finished jobs whose retention window has passed,
//! together with their row errors and stored artifacts. Artifact removal is
//! best-effort: a failure is logged and the job record is removed anyway.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::store::{JobStore, StoreError};
use crate::storage::ArtifactStore;

/// Jobs removed per store round trip
pub const DEFAULT_REAP_BATCH_SIZE: i64 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapStats {
    pub jobs_removed: usize,
    pub artifacts_removed: usize,
    pub artifact_failures: usize,
}

pub struct ExpiryReaper {
    store: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    interval: Duration,
    batch_size: i64,
}

impl ExpiryReaper {
    pub fn new(store: Arc<dyn JobStore>, artifacts: Arc<dyn ArtifactStore>, interval: Duration) -> Self {
        Self {
            store,
            artifacts,
            interval,
            batch_size: DEFAULT_REAP_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Remove every job that expired before `now`
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<ReapStats, StoreError> {
        let mut stats = ReapStats::default();

        loop {
            let expired = self.store.list_expired(now, self.batch_size).await?;
            if expired.is_empty() {
                break;
            }
            let batch = expired.len();

            for job in expired {
                for key in job.output_ref.iter().chain(job.input_ref.iter()) {
                    match self.artifacts.delete(key).await {
                        Ok(()) => stats.artifacts_removed += 1,
                        Err(e) => {
                            stats.artifact_failures += 1;
                            warn!(job_id = %job.id, key = %key, error = %e, "Failed to delete artifact");
                        },
                    }
                }
                if self.store.delete(job.id).await? {
                    stats.jobs_removed += 1;
                    debug!(job_id = %job.id, status = %job.status, "Expired job removed");
                }
            }

            if (batch as i64) < self.batch_size {
                break;
            }
        }

        if stats.jobs_removed > 0 {
            info!(
                jobs_removed = stats.jobs_removed,
                artifacts_removed = stats.artifacts_removed,
                artifact_failures = stats.artifact_failures,
                "Expiry sweep finished"
            );
        }
        Ok(stats)
    }

    /// Sweep on every tick until `shutdown` fires
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Expiry reaper started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep(Utc::now()).await {
                            error!(error = %e, "Expiry sweep failed");
                        }
                    },
                }
            }
            info!("Expiry reaper stopped");
        })
    }
}
