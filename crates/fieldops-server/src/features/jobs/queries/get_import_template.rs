//! Import template query
//!
//! A CSV with every accepted column and one sample row.

use mediator::Request;

use crate::jobs::types::Resource;
use crate::jobs::validator::schema::template_rows;

#[derive(Debug, Clone)]
pub struct GetImportTemplateQuery {
    pub resource: String,
}

#[derive(Debug, Clone)]
pub struct ImportTemplate {
    pub file_name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum GetImportTemplateError {
    #[error("Unknown resource '{0}'")]
    UnknownResource(String),

    #[error("Import is not supported for {0}")]
    NotImportable(Resource),

    #[error("Failed to render template: {0}")]
    Render(#[from] csv::Error),
}

impl Request<Result<ImportTemplate, GetImportTemplateError>> for GetImportTemplateQuery {}

pub fn handle(query: GetImportTemplateQuery) -> Result<ImportTemplate, GetImportTemplateError> {
    let resource: Resource = query
        .resource
        .parse()
        .map_err(|_| GetImportTemplateError::UnknownResource(query.resource.clone()))?;
    let (header, sample) =
        template_rows(resource).ok_or(GetImportTemplateError::NotImportable(resource))?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&header)?;
    writer.write_record(&sample)?;
    let content = writer
        .into_inner()
        .map_err(|e| GetImportTemplateError::Render(csv::Error::from(e.into_error())))?;

    Ok(ImportTemplate {
        file_name: format!("{}_import_template.csv", resource),
        content,
    })
}
