//! In-memory collaborators for tests and local experiments

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use crate::jobs::processor::{
    ApplyOutcome, CollaboratorError, DbValue, EntityWrite, EntityWriter, ExportQuery, Page,
    Record, RecordSource,
};
use crate::jobs::reference::{ReferenceKind, ReferenceLookup};
use crate::jobs::types::Resource;

fn key_part(value: Option<&DbValue>) -> String {
    match value {
        Some(DbValue::Text(v)) => v.to_lowercase(),
        Some(DbValue::Integer(v)) => v.to_string(),
        Some(DbValue::Decimal(v)) => v.to_string(),
        Some(DbValue::Boolean(v)) => v.to_string(),
        None => String::new(),
    }
}

/// Entity rows keyed by resource and entity key
#[derive(Default)]
pub struct MemoryEntityWriter {
    entities: Mutex<HashMap<(Resource, String), BTreeMap<&'static str, DbValue>>>,
}

impl MemoryEntityWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self, resource: Resource) -> usize {
        let entities = self.entities.lock().await;
        entities.keys().filter(|(r, _)| *r == resource).count()
    }

    /// Stored column values of one entity, looked up by its key values
    pub async fn get(&self, resource: Resource, key: &[&str]) -> Option<BTreeMap<&'static str, DbValue>> {
        let key = key.iter().map(|k| k.to_lowercase()).collect::<Vec<_>>().join("|");
        self.entities.lock().await.get(&(resource, key)).cloned()
    }
}

#[async_trait]
impl EntityWriter for MemoryEntityWriter {
    async fn apply(
        &self,
        write: &EntityWrite,
        update_existing: bool,
    ) -> Result<ApplyOutcome, CollaboratorError> {
        let key = write
            .key_columns
            .iter()
            .map(|c| key_part(write.get(c)))
            .collect::<Vec<_>>()
            .join("|");

        let mut entities = self.entities.lock().await;
        match entities.get_mut(&(write.resource, key.clone())) {
            Some(_) if !update_existing => Ok(ApplyOutcome::Rejected(format!(
                "{} with {} '{}' already exists",
                write.resource, write.key_columns.join(" + "), key
            ))),
            Some(existing) => {
                for (column, value) in &write.values {
                    existing.insert(*column, value.clone());
                }
                Ok(ApplyOutcome::Updated)
            },
            None => {
                entities.insert((write.resource, key), write.values.iter().cloned().collect());
                Ok(ApplyOutcome::Created)
            },
        }
    }
}

/// Fixed code tables
#[derive(Default, Clone)]
pub struct MemoryReferenceLookup {
    codes: HashMap<ReferenceKind, HashMap<String, i64>>,
}

impl MemoryReferenceLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ReferenceKind, code: &str, id: i64) -> Self {
        self.codes.entry(kind).or_default().insert(code.to_string(), id);
        self
    }
}

#[async_trait]
impl ReferenceLookup for MemoryReferenceLookup {
    async fn load(&self, kind: ReferenceKind) -> Result<HashMap<String, i64>, CollaboratorError> {
        Ok(self.codes.get(&kind).cloned().unwrap_or_default())
    }
}

/// Records per resource, each a JSON object with an integer `id`
#[derive(Default)]
pub struct MemoryRecordSource {
    tables: Mutex<HashMap<Resource, BTreeMap<i64, Map<String, Value>>>>,
}

fn matches_filters(record: &Map<String, Value>, filters: &BTreeMap<String, String>) -> bool {
    filters.iter().all(|(column, expected)| match record.get(column) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Null) | None => false,
        Some(other) => other.to_string() == *expected,
    })
}

impl MemoryRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, resource: Resource, record: Value) -> Result<(), CollaboratorError> {
        let Value::Object(record) = record else {
            return Err(CollaboratorError::Unavailable("record must be a JSON object".into()));
        };
        let id = record
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| CollaboratorError::Unavailable("record needs an integer id".into()))?;
        self.tables.lock().await.entry(resource).or_default().insert(id, record);
        Ok(())
    }
}

#[async_trait]
impl RecordSource for MemoryRecordSource {
    async fn count(&self, query: &ExportQuery) -> Result<u64, CollaboratorError> {
        let tables = self.tables.lock().await;
        let count = tables
            .get(&query.resource)
            .map(|t| t.values().filter(|r| matches_filters(r, &query.filters)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn fetch_page(
        &self,
        query: &ExportQuery,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<Page, CollaboratorError> {
        let tables = self.tables.lock().await;
        let Some(table) = tables.get(&query.resource) else {
            return Ok(Page::default());
        };

        let start = cursor.map_or(std::ops::Bound::Unbounded, std::ops::Bound::Excluded);
        let selected: Vec<(i64, Record)> = table
            .range((start, std::ops::Bound::Unbounded))
            .filter(|(_, r)| matches_filters(r, &query.filters))
            .take(limit)
            .map(|(id, r)| {
                let record = query
                    .columns
                    .iter()
                    .map(|c| r.get(c).cloned().unwrap_or(Value::Null))
                    .collect();
                (*id, record)
            })
            .collect();

        let next_cursor = if selected.len() == limit {
            selected.last().map(|(id, _)| *id)
        } else {
            None
        };
        Ok(Page {
            records: selected.into_iter().map(|(_, r)| r).collect(),
            next_cursor,
        })
    }
}
