//! FieldOps Server Library
//!
//! Asynchronous bulk import/export pipeline for the field-ops platform.
//!
//! # Overview
//!
//! - **Submission**: CSV uploads and export requests are accepted, recorded
//!   as `pending` jobs and queued; the HTTP response never waits on the work
//! - **Execution**: a bounded worker pool runs each job through validation,
//!   row processing or chunked export, checkpointing progress as it goes
//! - **Tracking**: status, percentage, row errors and download links are
//!   available per job, scoped to the submitting user
//! - **Lifecycle**: cooperative cancellation, a per-job time limit, restart
//!   recovery and an expiry reaper for finished jobs
//!
//! # Architecture
//!
//! The HTTP surface follows the feature-slice CQRS layout:
//!
//! - **Commands** (`features/*/commands`): submit import, submit export, cancel
//! - **Queries** (`features/*/queries`): status, list, row errors, download,
//!   import template
//!
//! Job state lives behind the [`jobs::JobStore`] trait with PostgreSQL and
//! in-memory implementations. Uploaded inputs and export outputs live behind
//! [`storage::ArtifactStore`] (S3 or local disk).
//!
//! # Example
//!
//! ```no_run
//! use fieldops_server::{config::Config, db};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     db::MIGRATOR.run(&pool).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod features;
pub mod jobs;
pub mod middleware;
pub mod storage;

// Re-export commonly used types
pub use error::AppError;
