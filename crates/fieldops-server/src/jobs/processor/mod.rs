//! Row processing against external collaborators
//!
//! Imports apply one validated row at a time through an [`EntityWriter`];
//! exports pull bounded pages from a [`RecordSource`] and hand them to a
//! [`ChunkRenderer`].

pub mod export;
pub mod import;

use thiserror::Error;

pub use export::{
    export_columns, Chunk, ChunkRenderer, CsvRenderer, ExportQuery, ExportStreamer, JsonRenderer, Page,
    Record, RecordSource, RendererRegistry,
};
pub use import::{ApplyOutcome, DbValue, EntityWrite, EntityWriter, RowProcessor};

/// Fault raised by a collaborator. Always fatal for the job.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Render error: {0}")]
    Render(String),

    #[error("{0}")]
    Unavailable(String),
}

impl From<csv::Error> for CollaboratorError {
    fn from(e: csv::Error) -> Self {
        CollaboratorError::Render(e.to_string())
    }
}

impl From<serde_json::Error> for CollaboratorError {
    fn from(e: serde_json::Error) -> Self {
        CollaboratorError::Render(e.to_string())
    }
}
