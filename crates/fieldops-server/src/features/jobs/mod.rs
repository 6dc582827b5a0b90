//! Jobs feature module
//!
//! Submission, status, cancellation, error reports and downloads for bulk
//! import/export jobs. Every route requires a [`Principal`](crate::middleware::Principal);
//! callers only see their own jobs unless they hold an admin role.

pub mod commands;
pub mod queries;
pub mod routes;

#[cfg(test)]
mod routes_test;

pub use routes::jobs_routes;
