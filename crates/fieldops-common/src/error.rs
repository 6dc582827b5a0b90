//! Error types for FieldOps

use thiserror::Error;

/// Result type alias for FieldOps operations
pub type Result<T> = std::result::Result<T, FieldOpsError>;

/// Main error type for FieldOps
#[derive(Error, Debug)]
pub enum FieldOpsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Unknown export format: {0}")]
    UnknownFormat(String),

    #[error("Unknown job kind: {0}")]
    UnknownJobKind(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
