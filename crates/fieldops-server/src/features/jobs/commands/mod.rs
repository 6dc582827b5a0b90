//! Job commands (write operations)

pub mod cancel_job;
pub mod submit_export;
pub mod submit_import;

pub use cancel_job::{CancelJobCommand, CancelJobResponse};
pub use submit_export::{SubmitExportCommand, SubmitExportError};
pub use submit_import::{SubmitImportCommand, SubmitImportError, SubmitJobResponse};
