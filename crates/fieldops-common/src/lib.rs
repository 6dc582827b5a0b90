//! FieldOps Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the FieldOps workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`FieldOpsError`] and the [`Result`] alias
//! - **Logging**: environment driven `tracing` setup
//! - **Types**: job kinds, resources and export formats shared by the server
//!   and its clients
//!
//! # Example
//!
//! ```no_run
//! use fieldops_common::types::{ExportFormat, Resource};
//!
//! fn artifact_name(resource: &str, format: &str) -> fieldops_common::Result<String> {
//!     let resource: Resource = resource.parse()?;
//!     let format: ExportFormat = format.parse()?;
//!     Ok(format!("{}.{}", resource, format.extension()))
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{FieldOpsError, Result};
