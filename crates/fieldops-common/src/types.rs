//! Domain types shared across FieldOps crates

use serde::{Deserialize, Serialize};

use crate::error::FieldOpsError;

/// Direction of a bulk job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Import,
    Export,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Import => "import",
            JobKind::Export => "export",
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = FieldOpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "import" => Ok(JobKind::Import),
            "export" => Ok(JobKind::Export),
            _ => Err(FieldOpsError::UnknownJobKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity collections that bulk jobs read from or write to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Users,
    Wards,
    PollingBooths,
    Voters,
    Feedback,
    FieldReports,
    Campaigns,
    Interactions,
    SentimentData,
}

impl Resource {
    pub const ALL: [Resource; 9] = [
        Resource::Users,
        Resource::Wards,
        Resource::PollingBooths,
        Resource::Voters,
        Resource::Feedback,
        Resource::FieldReports,
        Resource::Campaigns,
        Resource::Interactions,
        Resource::SentimentData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Users => "users",
            Resource::Wards => "wards",
            Resource::PollingBooths => "polling_booths",
            Resource::Voters => "voters",
            Resource::Feedback => "feedback",
            Resource::FieldReports => "field_reports",
            Resource::Campaigns => "campaigns",
            Resource::Interactions => "interactions",
            Resource::SentimentData => "sentiment_data",
        }
    }

    /// Whether CSV bulk import is available for this resource
    pub fn supports_import(&self) -> bool {
        matches!(self, Resource::Users | Resource::Wards | Resource::PollingBooths)
    }
}

impl std::str::FromStr for Resource {
    type Err = FieldOpsError;

    /// Accepts both `polling_booths` and `polling-booths` spellings
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Resource::ALL
            .into_iter()
            .find(|r| r.as_str() == normalized)
            .ok_or_else(|| FieldOpsError::UnknownResource(s.to_string()))
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of an export job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Csv,
    Excel,
    Json,
    Pdf,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "excel",
            ExportFormat::Json => "json",
            ExportFormat::Pdf => "pdf",
        }
    }

    /// File extension of the produced artifact
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "xlsx",
            ExportFormat::Json => "json",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Excel => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            },
            ExportFormat::Json => "application/json",
            ExportFormat::Pdf => "application/pdf",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = FieldOpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "excel" | "xlsx" => Ok(ExportFormat::Excel),
            "json" => Ok(ExportFormat::Json),
            "pdf" => Ok(ExportFormat::Pdf),
            _ => Err(FieldOpsError::UnknownFormat(s.to_string())),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_parse_accepts_dashes() {
        assert_eq!("polling-booths".parse::<Resource>().unwrap(), Resource::PollingBooths);
        assert_eq!("Field_Reports".parse::<Resource>().unwrap(), Resource::FieldReports);
        assert!(matches!(
            "constituencies".parse::<Resource>(),
            Err(FieldOpsError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_resource_import_support() {
        let importable: Vec<_> = Resource::ALL.into_iter().filter(|r| r.supports_import()).collect();
        assert_eq!(importable, vec![Resource::Users, Resource::Wards, Resource::PollingBooths]);
    }

    #[test]
    fn test_export_format_metadata() {
        assert_eq!("xlsx".parse::<ExportFormat>().unwrap(), ExportFormat::Excel);
        assert_eq!(ExportFormat::Excel.extension(), "xlsx");
        assert_eq!(ExportFormat::Csv.content_type(), "text/csv");
        assert!("docx".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&Resource::SentimentData).unwrap();
        assert_eq!(json, "\"sentiment_data\"");
        let kind: JobKind = serde_json::from_str("\"export\"").unwrap();
        assert_eq!(kind, JobKind::Export);
    }
}
