//! Bulk import/export job pipeline
//!
//! A job is created `pending` by a submission, picked up by the
//! [`queue::WorkerPool`] and executed by [`runner::JobRunner`]. Clients poll
//! [`reporter::StatusReport`], may request cancellation through
//! [`canceller::cancel`], and finished jobs are removed by the
//! [`reaper::ExpiryReaper`] once their retention window has passed.

pub mod canceller;
pub mod processor;
pub mod queue;
pub mod reaper;
pub mod reference;
pub mod reporter;
pub mod runner;
pub mod store;
pub mod types;
pub mod validator;

pub use canceller::{cancel, CancelError};
pub use queue::{recover, JobExecutor, QueueError, TaskQueue, WorkerPool};
pub use reaper::{ExpiryReaper, ReapStats};
pub use reporter::StatusReport;
pub use runner::{Collaborators, JobRunner, RunOutcome, RunnerError, RunnerSettings};
pub use store::{JobStore, MemoryJobStore, PgJobStore, StoreError};
pub use types::{Job, JobFilter, JobParams, JobStatus, NewJob, OwnerScope, RowError};
