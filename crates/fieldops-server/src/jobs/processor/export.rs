//! Chunked export streaming

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::CollaboratorError;
use crate::jobs::types::{ExportFormat, Resource};

/// Columns available for export, in output order
pub fn export_columns(resource: Resource) -> &'static [&'static str] {
    match resource {
        Resource::Users => &[
            "id",
            "name",
            "email",
            "role",
            "phone",
            "state_code",
            "district_code",
            "is_active",
            "created_at",
        ],
        Resource::Wards => &[
            "id",
            "name",
            "code",
            "constituency_code",
            "ward_number",
            "population",
            "voter_count",
            "total_booths",
            "urbanization",
            "income_level",
            "literacy_rate",
        ],
        Resource::PollingBooths => &[
            "id",
            "constituency_code",
            "ward_code",
            "booth_number",
            "name",
            "address",
            "latitude",
            "longitude",
            "total_voters",
            "male_voters",
            "female_voters",
            "transgender_voters",
            "booth_type",
            "is_accessible",
            "is_active",
            "priority_level",
        ],
        Resource::Voters => &[
            "id",
            "voter_id",
            "first_name",
            "last_name",
            "gender",
            "age",
            "phone",
            "ward_code",
            "booth_number",
            "sentiment",
            "created_at",
        ],
        Resource::Feedback => &[
            "id",
            "citizen_name",
            "phone",
            "category",
            "message",
            "status",
            "ward_code",
            "created_at",
        ],
        Resource::FieldReports => &[
            "id",
            "report_type",
            "title",
            "description",
            "ward_code",
            "status",
            "created_at",
        ],
        Resource::Campaigns => &[
            "id",
            "name",
            "campaign_type",
            "status",
            "start_date",
            "end_date",
            "budget",
            "created_at",
        ],
        Resource::Interactions => &[
            "id",
            "voter_id",
            "interaction_type",
            "notes",
            "outcome",
            "created_at",
        ],
        Resource::SentimentData => &[
            "id",
            "source",
            "issue",
            "sentiment_score",
            "polarity",
            "ward_code",
            "recorded_at",
        ],
    }
}

/// What to export: resource, projected columns and equality filters
#[derive(Debug, Clone, PartialEq)]
pub struct ExportQuery {
    pub resource: Resource,
    pub columns: Vec<String>,
    pub filters: BTreeMap<String, String>,
}

impl ExportQuery {
    /// Check `fields` and `filters` against the resource columns. An empty
    /// `fields` selects every column.
    pub fn new(
        resource: Resource,
        fields: &[String],
        filters: &BTreeMap<String, String>,
    ) -> Result<Self, String> {
        let available = export_columns(resource);

        let mut columns: Vec<String> = Vec::with_capacity(fields.len());
        for field in fields {
            let field = field.trim();
            if !available.contains(&field) {
                return Err(format!("Unknown field '{}' for {}", field, resource));
            }
            if columns.iter().any(|c| c == field) {
                return Err(format!("Field '{}' requested twice", field));
            }
            columns.push(field.to_string());
        }
        if columns.is_empty() {
            columns = available.iter().map(|c| c.to_string()).collect();
        }

        if let Some(unknown) = filters.keys().find(|k| !available.contains(&k.as_str())) {
            return Err(format!("Cannot filter {} by '{}'", resource, unknown));
        }

        Ok(Self {
            resource,
            columns,
            filters: filters.clone(),
        })
    }
}

/// One export record, values aligned with [`ExportQuery::columns`]
pub type Record = Vec<Value>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    /// Keyset cursor for the next page; `None` once the source is exhausted
    pub next_cursor: Option<i64>,
}

/// Query boundary used by exports
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn count(&self, query: &ExportQuery) -> Result<u64, CollaboratorError>;

    /// Up to `limit` records ordered by id, starting after `cursor`
    async fn fetch_page(
        &self,
        query: &ExportQuery,
        cursor: Option<i64>,
        limit: usize,
    ) -> Result<Page, CollaboratorError>;
}

/// Serializes records into the bytes of one output format
pub trait ChunkRenderer: Send + Sync {
    fn format(&self) -> ExportFormat;

    fn begin(&self, columns: &[String]) -> Result<Vec<u8>, CollaboratorError>;

    /// `first` is true for the first chunk carrying records
    fn write_chunk(
        &self,
        columns: &[String],
        records: &[Record],
        first: bool,
    ) -> Result<Vec<u8>, CollaboratorError>;

    fn finish(&self) -> Result<Vec<u8>, CollaboratorError>;
}

pub struct CsvRenderer;

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl CsvRenderer {
    fn write_rows<I, R>(rows: I) -> Result<Vec<u8>, CollaboratorError>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = String>,
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        for row in rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| CollaboratorError::Render(e.to_string()))
    }
}

impl ChunkRenderer for CsvRenderer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    fn begin(&self, columns: &[String]) -> Result<Vec<u8>, CollaboratorError> {
        Self::write_rows([columns.iter().cloned()])
    }

    fn write_chunk(
        &self,
        _columns: &[String],
        records: &[Record],
        _first: bool,
    ) -> Result<Vec<u8>, CollaboratorError> {
        Self::write_rows(records.iter().map(|r| r.iter().map(csv_cell)))
    }

    fn finish(&self) -> Result<Vec<u8>, CollaboratorError> {
        Ok(Vec::new())
    }
}

/// Renders a single JSON array of objects
pub struct JsonRenderer;

impl ChunkRenderer for JsonRenderer {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    fn begin(&self, _columns: &[String]) -> Result<Vec<u8>, CollaboratorError> {
        Ok(b"[".to_vec())
    }

    fn write_chunk(
        &self,
        columns: &[String],
        records: &[Record],
        first: bool,
    ) -> Result<Vec<u8>, CollaboratorError> {
        let mut out = Vec::new();
        for (i, record) in records.iter().enumerate() {
            if !(first && i == 0) {
                out.push(b',');
            }
            out.push(b'\n');
            let object: serde_json::Map<String, Value> = columns
                .iter()
                .cloned()
                .zip(record.iter().cloned())
                .collect();
            serde_json::to_writer(&mut out, &object)?;
        }
        Ok(out)
    }

    fn finish(&self) -> Result<Vec<u8>, CollaboratorError> {
        Ok(b"\n]\n".to_vec())
    }
}

/// Renderers available to export jobs, keyed by format
#[derive(Clone, Default)]
pub struct RendererRegistry {
    renderers: HashMap<ExportFormat, Arc<dyn ChunkRenderer>>,
}

impl RendererRegistry {
    /// CSV and JSON
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(CsvRenderer));
        registry.register(Arc::new(JsonRenderer));
        registry
    }

    pub fn register(&mut self, renderer: Arc<dyn ChunkRenderer>) {
        self.renderers.insert(renderer.format(), renderer);
    }

    pub fn get(&self, format: ExportFormat) -> Option<Arc<dyn ChunkRenderer>> {
        self.renderers.get(&format).cloned()
    }

    pub fn supports(&self, format: ExportFormat) -> bool {
        self.renderers.contains_key(&format)
    }
}

/// Rendered bytes for one page of records
#[derive(Debug)]
pub struct Chunk {
    pub bytes: Vec<u8>,
    pub records: u64,
}

/// Pulls pages from a source and renders them, never holding more than
/// one page in memory. Stops after `limit` records.
pub struct ExportStreamer<'a> {
    source: &'a dyn RecordSource,
    renderer: &'a dyn ChunkRenderer,
    query: &'a ExportQuery,
    chunk_size: usize,
    remaining: u64,
    cursor: Option<i64>,
    first: bool,
    exhausted: bool,
}

impl<'a> ExportStreamer<'a> {
    pub fn new(
        source: &'a dyn RecordSource,
        renderer: &'a dyn ChunkRenderer,
        query: &'a ExportQuery,
        chunk_size: usize,
        limit: u64,
    ) -> Self {
        Self {
            source,
            renderer,
            query,
            chunk_size: chunk_size.max(1),
            remaining: limit,
            cursor: None,
            first: true,
            exhausted: false,
        }
    }

    pub fn begin(&self) -> Result<Vec<u8>, CollaboratorError> {
        self.renderer.begin(&self.query.columns)
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, CollaboratorError> {
        if self.exhausted || self.remaining == 0 {
            return Ok(None);
        }

        let limit = self.chunk_size.min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let mut page = self.source.fetch_page(self.query, self.cursor, limit).await?;
        page.records.truncate(limit);

        if page.records.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        let bytes = self
            .renderer
            .write_chunk(&self.query.columns, &page.records, self.first)?;
        let records = page.records.len() as u64;

        self.first = false;
        self.remaining -= records;
        self.cursor = page.next_cursor;
        self.exhausted = page.next_cursor.is_none();

        Ok(Some(Chunk { bytes, records }))
    }

    pub fn finish(&self) -> Result<Vec<u8>, CollaboratorError> {
        self.renderer.finish()
    }
}
