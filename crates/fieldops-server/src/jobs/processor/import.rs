//! Applying validated import rows

use async_trait::async_trait;
use std::sync::Arc;

use super::CollaboratorError;
use crate::jobs::reference::ReferenceIndex;
use crate::jobs::types::Resource;
use crate::jobs::validator::schema::{schema_for, FieldRule};
use crate::jobs::validator::{FieldValue, ValidatedRow};

/// Column value ready to be written
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
}

/// Resolved create-or-update request for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityWrite {
    pub resource: Resource,
    pub row_number: i64,
    /// Columns identifying the entity, all present in `values`
    pub key_columns: Vec<&'static str>,
    pub values: Vec<(&'static str, DbValue)>,
}

impl EntityWrite {
    pub fn get(&self, column: &str) -> Option<&DbValue> {
        self.values.iter().find(|(c, _)| *c == column).map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    /// The entity layer refused this row; recorded as a row error
    Rejected(String),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Created | ApplyOutcome::Updated)
    }
}

/// Entity persistence boundary used by imports
#[async_trait]
pub trait EntityWriter: Send + Sync {
    /// Create the entity, or update it when it exists and `update_existing` is set.
    /// An existing entity without `update_existing` is a rejection, not a fault.
    async fn apply(
        &self,
        write: &EntityWrite,
        update_existing: bool,
    ) -> Result<ApplyOutcome, CollaboratorError>;
}

/// Turns validated rows into entity writes
#[derive(Clone)]
pub struct RowProcessor {
    writer: Arc<dyn EntityWriter>,
}

impl RowProcessor {
    pub fn new(writer: Arc<dyn EntityWriter>) -> Self {
        Self { writer }
    }

    /// Apply one row on its own; no state is shared with other rows
    pub async fn apply(
        &self,
        row: &ValidatedRow,
        references: &ReferenceIndex,
        update_existing: bool,
    ) -> Result<ApplyOutcome, CollaboratorError> {
        let write = match resolve(row, references) {
            Ok(write) => write,
            Err(message) => return Ok(ApplyOutcome::Rejected(message)),
        };
        self.writer.apply(&write, update_existing).await
    }
}

/// Replace foreign-key codes by the ids of the referenced entities
pub fn resolve(row: &ValidatedRow, references: &ReferenceIndex) -> Result<EntityWrite, String> {
    let key_columns: Vec<&'static str> = schema_for(row.resource)
        .map(|schema| {
            schema
                .key_columns
                .iter()
                .map(|key| match schema.column(key).map(|c| c.rule) {
                    Some(FieldRule::Reference(kind)) => kind.id_column(),
                    _ => *key,
                })
                .collect()
        })
        .unwrap_or_default();

    let mut values = Vec::with_capacity(row.values.len());
    for (column, value) in &row.values {
        match value {
            FieldValue::Text(v) => values.push((*column, DbValue::Text(v.clone()))),
            FieldValue::Integer(v) => values.push((*column, DbValue::Integer(*v))),
            FieldValue::Decimal(v) => values.push((*column, DbValue::Decimal(*v))),
            FieldValue::Boolean(v) => values.push((*column, DbValue::Boolean(*v))),
            FieldValue::Reference { kind, code } => {
                let id = references
                    .resolve(*kind, code)
                    .ok_or_else(|| format!("{} code {} no longer exists", kind, code))?;
                values.push((kind.id_column(), DbValue::Integer(id)));
            },
        }
    }

    Ok(EntityWrite {
        resource: row.resource,
        row_number: row.number,
        key_columns,
        values,
    })
}
