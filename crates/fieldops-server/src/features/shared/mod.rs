//! Helpers shared by feature slices

pub mod pagination;

pub use pagination::{PaginationMetadata, PaginationParams};
