//! Entity persistence collaborators
//!
//! Implementations of the boundaries the job pipeline calls into:
//! [`EntityWriter`](crate::jobs::processor::EntityWriter) for imports,
//! [`RecordSource`](crate::jobs::processor::RecordSource) for exports and
//! [`ReferenceLookup`](crate::jobs::reference::ReferenceLookup) for
//! foreign-key codes.

pub mod memory;
pub mod postgres;

pub use memory::{MemoryEntityWriter, MemoryRecordSource, MemoryReferenceLookup};
pub use postgres::{PgEntityWriter, PgRecordSource, PgReferenceLookup};
