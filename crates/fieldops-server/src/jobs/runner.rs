//! Job execution
//!
//! [`JobRunner::run`] drives one job from `pending` to a terminal state:
//!
//! 1. claim the job (`pending -> validating`, compare-and-set in the store)
//! 2. validate the input shape and learn `total_rows`
//! 3. move to `processing` and stream rows or records in bounded memory
//! 4. checkpoint every `checkpoint_rows` rows or `checkpoint_interval`,
//!    whichever comes first, then read the cancellation flag
//! 5. record the terminal state with `completed_at` and `expires_at`
//!
//! Row-level problems never abort a job. Header problems and collaborator
//! faults do, and counters already flushed are kept.

use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::processor::{
    ApplyOutcome, CollaboratorError, EntityWriter, ExportQuery, ExportStreamer, RecordSource,
    RendererRegistry, RowProcessor,
};
use super::reference::{ReferenceIndex, ReferenceLookup};
use super::store::{JobStore, StoreError};
use super::types::{
    ExportFormat, Job, JobParams, JobStatus, OwnerScope, RowError, TransitionFields,
};
use super::validator::schema::schema_for;
use super::validator::{summarize, DuplicateTracker, Row, Validator};
use crate::storage::{export_key, ArtifactError, ArtifactReader, ArtifactStore};

type CsvReader = csv_async::AsyncReader<ArtifactReader>;

/// Tunables for job execution
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub checkpoint_rows: u64,
    pub checkpoint_interval: Duration,
    /// Wall-clock ceiling for one job
    pub timeout: Duration,
    pub retention: chrono::Duration,
    pub max_import_rows: u64,
    pub export_chunk_size: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        crate::config::JobsConfig::default().runner_settings()
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Failed to read input: {0}")]
    Input(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job exceeded the time limit of {}s", .0.as_secs())]
    Timeout(Duration),
}

/// How a call to [`JobRunner::run`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    Cancelled,
    /// The job was not pending (already claimed or finished); nothing was done
    Skipped(JobStatus),
}

enum Finish {
    Completed { output: Option<(String, i64)> },
    Cancelled,
}

enum Abort {
    /// The input itself is unacceptable; no rows were touched
    Rejected(String),
    Fatal(RunnerError),
}

impl From<RunnerError> for Abort {
    fn from(e: RunnerError) -> Self {
        Abort::Fatal(e)
    }
}

impl From<StoreError> for Abort {
    fn from(e: StoreError) -> Self {
        Abort::Fatal(e.into())
    }
}

impl From<ArtifactError> for Abort {
    fn from(e: ArtifactError) -> Self {
        Abort::Fatal(e.into())
    }
}

impl From<CollaboratorError> for Abort {
    fn from(e: CollaboratorError) -> Self {
        Abort::Fatal(e.into())
    }
}

impl From<std::io::Error> for Abort {
    fn from(e: std::io::Error) -> Self {
        Abort::Fatal(e.into())
    }
}

/// Buffered row outcomes between two checkpoints
struct Checkpointer {
    job_id: Uuid,
    every_rows: u64,
    every: Duration,
    success: i64,
    failed: i64,
    errors: Vec<RowError>,
    since_flush: u64,
    last_flush: Instant,
}

impl Checkpointer {
    fn new(job_id: Uuid, settings: &RunnerSettings) -> Self {
        Self {
            job_id,
            every_rows: settings.checkpoint_rows.max(1),
            every: settings.checkpoint_interval,
            success: 0,
            failed: 0,
            errors: Vec::new(),
            since_flush: 0,
            last_flush: Instant::now(),
        }
    }

    fn success(&mut self, rows: u64) {
        self.success += rows as i64;
        self.since_flush += rows;
    }

    fn failure(&mut self, error: RowError) {
        self.failed += 1;
        self.since_flush += 1;
        self.errors.push(error);
    }

    fn is_due(&self) -> bool {
        self.since_flush >= self.every_rows
            || (self.since_flush > 0 && self.last_flush.elapsed() >= self.every)
    }

    /// Persist buffered outcomes; the buffer is kept if the store call fails
    async fn flush(&mut self, store: &dyn JobStore) -> Result<(), StoreError> {
        if self.success != 0 || self.failed != 0 || !self.errors.is_empty() {
            store
                .record_checkpoint(self.job_id, self.success, self.failed, &self.errors)
                .await?;
            debug!(
                job_id = %self.job_id,
                succeeded = self.success,
                failed = self.failed,
                "Checkpoint written"
            );
        }
        self.success = 0;
        self.failed = 0;
        self.errors.clear();
        self.since_flush = 0;
        self.last_flush = Instant::now();
        Ok(())
    }
}

/// Boundaries the runner calls into
#[derive(Clone)]
pub struct Collaborators {
    pub entities: Arc<dyn EntityWriter>,
    pub references: Arc<dyn ReferenceLookup>,
    pub records: Arc<dyn RecordSource>,
    pub renderers: RendererRegistry,
}

pub struct JobRunner {
    store: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    validator: Arc<Validator>,
    rows: RowProcessor,
    collaborators: Collaborators,
    settings: RunnerSettings,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        validator: Arc<Validator>,
        collaborators: Collaborators,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            artifacts,
            validator,
            rows: RowProcessor::new(collaborators.entities.clone()),
            collaborators,
            settings,
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Execute a job once. Calling it again for a job that is no longer
    /// pending does nothing and reports [`RunOutcome::Skipped`].
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn run(&self, job_id: Uuid) -> Result<RunOutcome, RunnerError> {
        let job = self.store.get(job_id, OwnerScope::Any).await?;
        if job.status != JobStatus::Pending {
            info!(status = %job.status, "Job is not pending, skipping");
            return Ok(RunOutcome::Skipped(job.status));
        }
        if job.cancel_requested {
            return self.cancel_before_start(job_id).await;
        }

        let claim = TransitionFields {
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        let job = match self.store.transition(job_id, JobStatus::Validating, claim).await {
            Ok(job) => job,
            Err(StoreError::InvalidTransition { from, .. }) => {
                info!(status = %from, "Job was claimed elsewhere, skipping");
                return Ok(RunOutcome::Skipped(from));
            },
            Err(e) => return Err(e.into()),
        };
        info!(kind = %job.kind, resource = %job.resource, "Job started");

        let mut progress = Checkpointer::new(job.id, &self.settings);
        let result =
            match tokio::time::timeout(self.settings.timeout, self.execute(&job, &mut progress)).await {
                Ok(result) => result,
                Err(_) => Err(Abort::Fatal(RunnerError::Timeout(self.settings.timeout))),
            };

        self.conclude(&job, result, &mut progress).await
    }

    /// Fail a job whose execution stopped without reaching a terminal state.
    /// `None` if the job is pending or already finished.
    pub async fn fail_abandoned(
        &self,
        job_id: Uuid,
        reason: &str,
    ) -> Result<Option<JobStatus>, RunnerError> {
        let fields = TransitionFields::finished(Utc::now(), self.settings.retention)
            .with_error(format!("Job aborted unexpectedly: {}", reason));
        match self.store.transition(job_id, JobStatus::Failed, fields).await {
            Ok(job) => Ok(Some(job.status)),
            Err(StoreError::InvalidTransition { .. } | StoreError::TerminalState { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn cancel_before_start(&self, job_id: Uuid) -> Result<RunOutcome, RunnerError> {
        let fields = TransitionFields::finished(Utc::now(), self.settings.retention);
        match self.store.transition(job_id, JobStatus::Cancelled, fields).await {
            Ok(_) => {
                info!("Job cancelled before it started");
                Ok(RunOutcome::Cancelled)
            },
            Err(StoreError::InvalidTransition { from, .. }) => Ok(RunOutcome::Skipped(from)),
            Err(e) => Err(e.into()),
        }
    }

    async fn conclude(
        &self,
        job: &Job,
        result: Result<Finish, Abort>,
        progress: &mut Checkpointer,
    ) -> Result<RunOutcome, RunnerError> {
        let fields = TransitionFields::finished(Utc::now(), self.settings.retention);
        match result {
            Ok(Finish::Completed { output }) => {
                let fields = match output {
                    Some((output_ref, size)) => fields.with_output(output_ref, size),
                    None => fields,
                };
                let job = self.store.transition(job.id, JobStatus::Completed, fields).await?;
                info!(
                    total_rows = job.total_rows,
                    succeeded = job.success_count,
                    failed = job.failed_count,
                    "Job completed"
                );
                Ok(RunOutcome::Completed)
            },
            Ok(Finish::Cancelled) => {
                let job = self.store.transition(job.id, JobStatus::Cancelled, fields).await?;
                info!(processed_rows = job.processed_rows, "Job cancelled");
                Ok(RunOutcome::Cancelled)
            },
            Err(Abort::Rejected(message)) => {
                warn!(reason = %message, "Job input rejected");
                self.store
                    .transition(job.id, JobStatus::Failed, fields.with_error(message))
                    .await?;
                Ok(RunOutcome::Failed)
            },
            Err(Abort::Fatal(e)) => {
                error!(error = %e, "Job failed");
                if let Err(flush_error) = progress.flush(self.store.as_ref()).await {
                    warn!(error = %flush_error, "Could not flush progress of failed job");
                }
                self.store
                    .transition(job.id, JobStatus::Failed, fields.with_error(e.to_string()))
                    .await?;
                Ok(RunOutcome::Failed)
            },
        }
    }

    async fn execute(&self, job: &Job, progress: &mut Checkpointer) -> Result<Finish, Abort> {
        match &job.params {
            JobParams::Import {
                update_existing, ..
            } => self.run_import(job, *update_existing, progress).await,
            JobParams::Export {
                format,
                filters,
                fields,
            } => {
                let query = ExportQuery::new(job.resource, fields, filters).map_err(Abort::Rejected)?;
                self.run_export(job, *format, &query, progress).await
            },
        }
    }

    async fn cancel_requested(&self, job_id: Uuid) -> Result<bool, Abort> {
        let requested = self.store.is_cancel_requested(job_id).await?;
        if requested {
            info!("Cancellation observed");
        }
        Ok(requested)
    }

    /// Flush if a checkpoint is due; true when the job should stop
    async fn checkpoint(&self, job_id: Uuid, progress: &mut Checkpointer) -> Result<bool, Abort> {
        if !progress.is_due() {
            return Ok(false);
        }
        progress.flush(self.store.as_ref()).await?;
        self.cancel_requested(job_id).await
    }

    async fn open_csv(&self, key: &str) -> Result<CsvReader, Abort> {
        let input = self.artifacts.open(key).await?;
        Ok(csv_async::AsyncReaderBuilder::new()
            .flexible(true)
            .create_reader(input))
    }

    async fn run_import(
        &self,
        job: &Job,
        update_existing: bool,
        progress: &mut Checkpointer,
    ) -> Result<Finish, Abort> {
        let schema = schema_for(job.resource).ok_or_else(|| {
            Abort::Rejected(format!("Resource '{}' does not support import", job.resource))
        })?;
        let input = job
            .input_ref
            .as_deref()
            .ok_or_else(|| RunnerError::Input("import job has no uploaded file".into()))?;

        let mut reader = self.open_csv(input).await?;
        let headers = read_headers(&mut reader).await?;
        self.validator
            .validate_headers(job.resource, &headers)
            .map_err(|e| Abort::Rejected(e.to_string()))?;

        let Some(total) = self.count_rows(job.id, &mut reader).await? else {
            return Ok(Finish::Cancelled);
        };
        if total == 0 {
            return Err(Abort::Rejected("CSV file contains no data rows".into()));
        }
        if total > self.settings.max_import_rows {
            return Err(Abort::Rejected(format!(
                "CSV file exceeds maximum of {} rows",
                self.settings.max_import_rows
            )));
        }
        drop(reader);

        let references =
            ReferenceIndex::load(self.collaborators.references.as_ref(), &schema.reference_kinds())
                .await?;

        let total = total as i64;
        let processing = TransitionFields {
            total_rows: Some(total),
            ..Default::default()
        };
        self.store.transition(job.id, JobStatus::Processing, processing).await?;
        info!(total_rows = total, "Header accepted, processing rows");
        if self.cancel_requested(job.id).await? {
            return Ok(Finish::Cancelled);
        }

        let mut reader = self.open_csv(input).await?;
        let headers: Arc<[String]> = read_headers(&mut reader).await?.into();
        let mut records = reader.into_records();
        let mut duplicates = DuplicateTracker::new(schema);
        let mut row_number: i64 = 0;

        while row_number < total {
            let Some(record) = records.next().await else {
                break;
            };
            row_number += 1;

            match record {
                Ok(record) => {
                    let row = Row::new(row_number, headers.clone(), record.iter().map(str::to_string).collect());
                    self.process_row(job, &row, &references, &mut duplicates, update_existing, progress)
                        .await?;
                },
                Err(e) if is_io_error(&e) => return Err(RunnerError::Input(e.to_string()).into()),
                Err(e) => progress.failure(RowError::new(
                    job.id,
                    row_number,
                    None,
                    format!("Malformed row: {}", e),
                    Value::Null,
                )),
            }

            if self.checkpoint(job.id, progress).await? {
                return Ok(Finish::Cancelled);
            }
        }

        progress.flush(self.store.as_ref()).await?;
        Ok(Finish::Completed { output: None })
    }

    /// Count data rows after the header. `None` if cancellation was requested meanwhile.
    async fn count_rows(&self, job_id: Uuid, reader: &mut CsvReader) -> Result<Option<u64>, Abort> {
        let every = self.settings.checkpoint_rows.max(1);
        let mut records = reader.byte_records();
        let mut count: u64 = 0;
        while let Some(record) = records.next().await {
            if let Err(e) = record {
                if is_io_error(&e) {
                    return Err(RunnerError::Input(e.to_string()).into());
                }
            }
            count += 1;
            if count > self.settings.max_import_rows {
                break;
            }
            if count % every == 0 && self.cancel_requested(job_id).await? {
                return Ok(None);
            }
        }
        Ok(Some(count))
    }

    async fn process_row(
        &self,
        job: &Job,
        row: &Row,
        references: &ReferenceIndex,
        duplicates: &mut DuplicateTracker,
        update_existing: bool,
        progress: &mut Checkpointer,
    ) -> Result<(), Abort> {
        let validated = match self.validator.validate_row(job.resource, row, references) {
            Ok(validated) => validated,
            Err(errors) => {
                let (field, message) = summarize(&errors);
                progress.failure(RowError::new(job.id, row.number, field, message, row.to_json()));
                return Ok(());
            },
        };

        if let Err(duplicate) = duplicates.check(&validated) {
            progress.failure(RowError::new(
                job.id,
                row.number,
                Some(duplicate.field),
                duplicate.message,
                row.to_json(),
            ));
            return Ok(());
        }

        match self.rows.apply(&validated, references, update_existing).await? {
            ApplyOutcome::Created | ApplyOutcome::Updated => progress.success(1),
            ApplyOutcome::Rejected(message) => {
                progress.failure(RowError::new(job.id, row.number, None, message, row.to_json()))
            },
        }
        Ok(())
    }

    async fn run_export(
        &self,
        job: &Job,
        format: ExportFormat,
        query: &ExportQuery,
        progress: &mut Checkpointer,
    ) -> Result<Finish, Abort> {
        let renderer = self.collaborators.renderers.get(format).ok_or_else(|| {
            Abort::Rejected(format!("No renderer registered for format '{}'", format))
        })?;

        let records = self.collaborators.records.as_ref();
        let total = records.count(query).await?;
        let processing = TransitionFields {
            total_rows: Some(total as i64),
            ..Default::default()
        };
        self.store.transition(job.id, JobStatus::Processing, processing).await?;
        info!(total_rows = total, format = %format, "Export query counted, rendering");
        if self.cancel_requested(job.id).await? {
            return Ok(Finish::Cancelled);
        }

        let spool = tempfile::NamedTempFile::new()?;
        let mut out = tokio::io::BufWriter::new(tokio::fs::File::create(spool.path()).await?);
        let mut streamer = ExportStreamer::new(
            records,
            renderer.as_ref(),
            query,
            self.settings.export_chunk_size,
            total,
        );

        out.write_all(&streamer.begin()?).await?;
        while let Some(chunk) = streamer.next_chunk().await? {
            out.write_all(&chunk.bytes).await?;
            progress.success(chunk.records);
            if self.checkpoint(job.id, progress).await? {
                return Ok(Finish::Cancelled);
            }
        }
        out.write_all(&streamer.finish()?).await?;
        out.flush().await?;
        drop(out);
        progress.flush(self.store.as_ref()).await?;

        let key = export_key(job.id, &job.file_name());
        let size = self
            .artifacts
            .put_file(&key, spool.path(), format.content_type())
            .await?;
        info!(output_ref = %key, bytes = size, "Export artifact stored");

        Ok(Finish::Completed {
            output: Some((key, size as i64)),
        })
    }
}

fn is_io_error(e: &csv_async::Error) -> bool {
    matches!(e.kind(), csv_async::ErrorKind::Io(_))
}

/// Header names are matched trimmed, lowercase and without a byte order mark
fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').trim().to_lowercase()
}

async fn read_headers(reader: &mut CsvReader) -> Result<Vec<String>, Abort> {
    match reader.headers().await {
        Ok(headers) => Ok(headers.iter().map(normalize_header).collect()),
        Err(e) if is_io_error(&e) => Err(RunnerError::Input(e.to_string()).into()),
        Err(e) => Err(Abort::Rejected(format!("Failed to parse CSV header: {}", e))),
    }
}
