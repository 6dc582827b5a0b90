//! PostgreSQL collaborators over the entity tables

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use tracing::instrument;

use crate::db::{check_constraint_violation, ConstraintViolation};
use crate::jobs::processor::{
    export_columns, ApplyOutcome, CollaboratorError, DbValue, EntityWrite, EntityWriter,
    ExportQuery, Page, Record, RecordSource,
};
use crate::jobs::reference::{ReferenceKind, ReferenceLookup};
use crate::jobs::types::Resource;

fn entity_table(resource: Resource) -> Result<&'static str, CollaboratorError> {
    match resource {
        Resource::Users => Ok("app_users"),
        Resource::Wards => Ok("wards"),
        Resource::PollingBooths => Ok("polling_booths"),
        other => Err(CollaboratorError::Unavailable(format!(
            "{} cannot be written by imports",
            other
        ))),
    }
}

fn reference_table(kind: ReferenceKind) -> &'static str {
    match kind {
        ReferenceKind::State => "states",
        ReferenceKind::District => "districts",
        ReferenceKind::Constituency => "constituencies",
        ReferenceKind::Ward => "wards",
    }
}

/// Each exportable resource is read through a view exposing its export columns
fn export_view(resource: Resource) -> String {
    format!("export_{}", resource.as_str())
}

fn push_value<'a>(qb: &mut sqlx::query_builder::Separated<'_, 'a, Postgres, &'static str>, value: &'a DbValue) {
    match value {
        DbValue::Text(v) => qb.push_bind(v.as_str()),
        DbValue::Integer(v) => qb.push_bind(*v),
        DbValue::Decimal(v) => qb.push_bind(*v),
        DbValue::Boolean(v) => qb.push_bind(*v),
    };
}

#[derive(Clone)]
pub struct PgEntityWriter {
    pool: PgPool,
}

impl PgEntityWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityWriter for PgEntityWriter {
    #[instrument(skip(self, write), fields(resource = %write.resource, row = write.row_number))]
    async fn apply(
        &self,
        write: &EntityWrite,
        update_existing: bool,
    ) -> Result<ApplyOutcome, CollaboratorError> {
        let table = entity_table(write.resource)?;
        let columns: Vec<&'static str> = write.values.iter().map(|(c, _)| *c).collect();

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!("INSERT INTO {} (", table));
        qb.push(columns.join(", ")).push(") VALUES (");
        {
            let mut separated = qb.separated(", ");
            for (_, value) in &write.values {
                push_value(&mut separated, value);
            }
        }
        qb.push(") ON CONFLICT (").push(write.key_columns.join(", ")).push(")");

        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !write.key_columns.contains(*c))
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        if update_existing {
            qb.push(" DO UPDATE SET updated_at = NOW()");
            for update in &updates {
                qb.push(", ").push(update);
            }
        } else {
            qb.push(" DO NOTHING");
        }
        qb.push(" RETURNING (xmax = 0) AS inserted");

        let inserted: Option<bool> = match qb.build_query_scalar::<bool>().fetch_optional(&self.pool).await {
            Ok(inserted) => inserted,
            Err(e) => {
                return match check_constraint_violation(e) {
                    ConstraintViolation::Unique(name) => Ok(ApplyOutcome::Rejected(format!(
                        "Conflicts with an existing {} ({})",
                        write.resource,
                        name.unwrap_or_else(|| "unique constraint".into())
                    ))),
                    ConstraintViolation::ForeignKey(name) => Ok(ApplyOutcome::Rejected(format!(
                        "Referenced entity no longer exists ({})",
                        name.unwrap_or_else(|| "foreign key".into())
                    ))),
                    ConstraintViolation::Check(name) => Ok(ApplyOutcome::Rejected(format!(
                        "Value rejected by {}",
                        name.unwrap_or_else(|| "check constraint".into())
                    ))),
                    ConstraintViolation::InvalidData(message) => {
                        Ok(ApplyOutcome::Rejected(format!("Value rejected by the database: {}", message)))
                    },
                    ConstraintViolation::Other(e) => Err(e.into()),
                };
            },
        };

        Ok(match inserted {
            Some(true) => ApplyOutcome::Created,
            Some(false) => ApplyOutcome::Updated,
            None => ApplyOutcome::Rejected(format!(
                "{} already exists and update_existing is off",
                write.resource
            )),
        })
    }
}

#[derive(Clone)]
pub struct PgReferenceLookup {
    pool: PgPool,
}

impl PgReferenceLookup {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferenceLookup for PgReferenceLookup {
    async fn load(&self, kind: ReferenceKind) -> Result<HashMap<String, i64>, CollaboratorError> {
        let sql = format!("SELECT code, id FROM {}", reference_table(kind));
        let rows: Vec<(String, i64)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().collect())
    }
}

#[derive(Clone)]
pub struct PgRecordSource {
    pool: PgPool,
}

impl PgRecordSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filters<'a>(
        qb: &mut QueryBuilder<'a, Postgres>,
        query: &'a ExportQuery,
    ) -> Result<(), CollaboratorError> {
        let available = export_columns(query.resource);
        qb.push(" WHERE TRUE");
        for (column, value) in &query.filters {
            // Column names are interpolated, so only listed columns get through
            if !available.contains(&column.as_str()) {
                return Err(CollaboratorError::Unavailable(format!(
                    "cannot filter {} by {}",
                    query.resource, column
                )));
            }
            qb.push(format!(" AND t.{}::text = ", column)).push_bind(value.as_str());
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSource for PgRecordSource {
    async fn count(&self, query: &ExportQuery) -> Result<u64, CollaboratorError> {
        let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {} t", export_view(query.resource)));
        Self::push_filters(&mut qb, query)?;
        let count = qb.build_query_scalar::<i64>().fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self, query), fields(resource = %query.resource))]
    async fn fetch_page(
        &self,
        query: &ExportQuery,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<Page, CollaboratorError> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT t.id, to_jsonb(t) AS record FROM {} t",
            export_view(query.resource)
        ));
        Self::push_filters(&mut qb, query)?;
        if let Some(cursor) = cursor {
            qb.push(" AND t.id > ").push_bind(cursor);
        }
        qb.push(" ORDER BY t.id LIMIT ").push_bind(limit as i64);

        let rows = qb.build_query_as::<(i64, Value)>().fetch_all(&self.pool).await?;

        let next_cursor = if rows.len() == limit {
            rows.last().map(|(id, _)| *id)
        } else {
            None
        };
        let records = rows
            .into_iter()
            .map(|(_, record)| -> Record {
                query
                    .columns
                    .iter()
                    .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(Page {
            records,
            next_cursor,
        })
    }
}
