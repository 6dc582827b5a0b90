//! Feature modules implementing the field-ops API
//!
//! Each feature is a vertical slice with its own commands, queries and
//! routes:
//! - `commands/` - Write operations
//! - `queries/` - Read operations
//! - `routes.rs` - HTTP route definitions
//!
//! Commands and queries implement the mediator `Request` trait and are
//! executed by plain `handle` functions.

pub mod jobs;
pub mod shared;

use axum::{extract::DefaultBodyLimit, Router};
use std::sync::Arc;
use std::time::Duration;

use crate::jobs::processor::RendererRegistry;
use crate::jobs::queue::TaskQueue;
use crate::jobs::store::JobStore;
use crate::storage::ArtifactStore;

/// Room for multipart boundaries and headers around an upload
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Longest validity of a download link
pub const DEFAULT_DOWNLOAD_URL_TTL: Duration = Duration::from_secs(3600);

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub store: Arc<dyn JobStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub queue: TaskQueue,
    pub max_upload_bytes: usize,
    pub download_ttl: Duration,
    /// Formats an export may be submitted in
    pub renderers: RendererRegistry,
}

impl FeatureState {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        queue: TaskQueue,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            store,
            artifacts,
            queue,
            max_upload_bytes,
            download_ttl: DEFAULT_DOWNLOAD_URL_TTL,
            renderers: RendererRegistry::with_defaults(),
        }
    }

    pub fn with_renderers(mut self, renderers: RendererRegistry) -> Self {
        self.renderers = renderers;
        self
    }
}

/// All feature routes, to be nested under `/api/v1`
///
/// - `/jobs` - Bulk import/export jobs
pub fn router(state: FeatureState) -> Router<()> {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes + MULTIPART_OVERHEAD_BYTES);
    Router::new().nest("/jobs", jobs::jobs_routes().layer(body_limit).with_state(state))
}
