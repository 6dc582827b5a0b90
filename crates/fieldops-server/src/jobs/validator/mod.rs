//! Header and row validation for imports
//!
//! Validation is synchronous and side-effect free: rows are checked against
//! the static [`schema`] of their resource and a [`ReferenceIndex`] snapshot.
//! A row either validates completely or yields every field problem at once.

pub mod schema;

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::reference::{ReferenceIndex, ReferenceKind};
use super::types::Resource;
use schema::{schema_for, ColumnSpec, CrossRule, FieldRule, ResourceSchema, MAX_EMAIL_LEN};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("Input has no header row")]
    Empty,

    #[error("Resource '{0}' does not support import")]
    Unsupported(Resource),

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

/// One problem with one cell of a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// One data row of an input file, addressed by column name
#[derive(Debug, Clone)]
pub struct Row {
    pub number: i64,
    headers: Arc<[String]>,
    values: Vec<String>,
}

impl Row {
    pub fn new(number: i64, headers: Arc<[String]>, values: Vec<String>) -> Self {
        Self {
            number,
            headers,
            values,
        }
    }

    /// Trimmed cell value; blank cells and missing columns are `None`
    pub fn get(&self, column: &str) -> Option<&str> {
        let index = self.headers.iter().position(|h| h == column)?;
        let value = self.values.get(index)?.trim();
        (!value.is_empty()).then_some(value)
    }

    /// Snapshot of the raw cells, kept with row errors
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .headers
            .iter()
            .zip(self.values.iter())
            .map(|(h, v)| (h.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::Value::Object(map)
    }
}

/// Parsed cell value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Reference { kind: ReferenceKind, code: String },
}

/// A row that passed validation, with parsed values in schema order
#[derive(Debug, Clone)]
pub struct ValidatedRow {
    pub number: i64,
    pub resource: Resource,
    pub values: Vec<(&'static str, FieldValue)>,
}

impl ValidatedRow {
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.values.iter().find(|(name, _)| *name == column).map(|(_, v)| v)
    }

    fn integer(&self, column: &str) -> Option<i64> {
        match self.get(column) {
            Some(FieldValue::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    /// Identity of the target entity, if every key column is present
    pub fn key(&self, schema: &ResourceSchema) -> Option<String> {
        let parts = schema
            .key_columns
            .iter()
            .map(|column| match self.get(column)? {
                FieldValue::Text(v) => Some(v.to_lowercase()),
                FieldValue::Reference { code, .. } => Some(code.to_uppercase()),
                other => Some(format!("{:?}", other)),
            })
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("|"))
    }
}

pub struct Validator {
    patterns: HashMap<&'static str, Regex>,
}

impl Validator {
    /// Compiles every pattern used by the import schemas
    pub fn new() -> Result<Self, regex::Error> {
        let mut patterns = HashMap::new();
        for resource in Resource::ALL {
            let Some(schema) = schema_for(resource) else {
                continue;
            };
            for column in schema.columns {
                if let FieldRule::Pattern { pattern, .. } = column.rule {
                    if !patterns.contains_key(pattern) {
                        patterns.insert(pattern, Regex::new(pattern)?);
                    }
                }
            }
        }
        Ok(Self { patterns })
    }

    /// Check that every required column is present. Unknown columns are ignored.
    pub fn validate_headers(&self, resource: Resource, columns: &[String]) -> Result<(), HeaderError> {
        let schema = schema_for(resource).ok_or(HeaderError::Unsupported(resource))?;
        if columns.iter().all(|c| c.trim().is_empty()) {
            return Err(HeaderError::Empty);
        }
        let missing: Vec<String> = schema
            .required_columns()
            .filter(|required| !columns.iter().any(|c| c == required))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(HeaderError::MissingColumns(missing))
        }
    }

    pub fn validate_row(
        &self,
        resource: Resource,
        row: &Row,
        references: &ReferenceIndex,
    ) -> Result<ValidatedRow, Vec<FieldError>> {
        let Some(schema) = schema_for(resource) else {
            return Err(vec![FieldError::new(
                "resource",
                format!("Resource '{}' does not support import", resource),
            )]);
        };

        let mut errors = Vec::new();
        let mut values = Vec::with_capacity(schema.columns.len());
        for column in schema.columns {
            match row.get(column.name) {
                None if column.required => {
                    errors.push(FieldError::new(column.name, format!("{} is required", column.name)))
                },
                None => {},
                Some(raw) => match self.check(column, raw, references) {
                    Ok(value) => values.push((column.name, value)),
                    Err(message) => errors.push(FieldError::new(column.name, message)),
                },
            }
        }

        let validated = ValidatedRow {
            number: row.number,
            resource,
            values,
        };
        for rule in schema.cross_rules {
            if let Some(error) = check_cross_rule(rule, &validated) {
                errors.push(error);
            }
        }

        if errors.is_empty() {
            Ok(validated)
        } else {
            Err(errors)
        }
    }

    fn check(
        &self,
        column: &ColumnSpec,
        raw: &str,
        references: &ReferenceIndex,
    ) -> Result<FieldValue, String> {
        let name = column.name;
        match column.rule {
            FieldRule::Text { max_len } => {
                if raw.chars().count() > max_len {
                    return Err(format!("{} must be at most {} characters", name, max_len));
                }
                Ok(FieldValue::Text(raw.to_string()))
            },
            FieldRule::Email => {
                if raw.chars().count() > MAX_EMAIL_LEN {
                    return Err(format!("{} must be at most {} characters", name, MAX_EMAIL_LEN));
                }
                if is_valid_email(raw) {
                    Ok(FieldValue::Text(raw.to_lowercase()))
                } else {
                    Err(format!("Email '{}' is invalid", raw))
                }
            },
            FieldRule::Phone => {
                let allowed = raw.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' '));
                if allowed && (7..=20).contains(&raw.len()) && raw.chars().any(|c| c.is_ascii_digit()) {
                    Ok(FieldValue::Text(raw.to_string()))
                } else {
                    Err(format!("Phone '{}' is invalid", raw))
                }
            },
            FieldRule::Pattern { pattern, example } => {
                let matches = self.patterns.get(pattern).is_some_and(|re| re.is_match(raw));
                if matches {
                    Ok(FieldValue::Text(raw.to_string()))
                } else {
                    Err(format!("{} '{}' must look like {}", name, raw, example))
                }
            },
            FieldRule::Choice(choices) => {
                let value = raw.to_lowercase();
                if choices.contains(&value.as_str()) {
                    Ok(FieldValue::Text(value))
                } else {
                    Err(format!(
                        "Invalid {}: {}. Must be one of: {}",
                        name,
                        raw,
                        choices.join(", ")
                    ))
                }
            },
            FieldRule::Integer { min, max } => {
                let value: i64 = raw
                    .parse()
                    .map_err(|_| format!("{} must be a whole number, got: {}", name, raw))?;
                if let Some(min) = min.filter(|m| value < *m) {
                    return Err(format!("{} must be at least {}", name, min));
                }
                if let Some(max) = max.filter(|m| value > *m) {
                    return Err(format!("{} must be at most {}", name, max));
                }
                Ok(FieldValue::Integer(value))
            },
            FieldRule::Decimal { min, max } => {
                let value: f64 = raw
                    .parse()
                    .ok()
                    .filter(|v: &f64| v.is_finite())
                    .ok_or_else(|| format!("{} must be a number, got: {}", name, raw))?;
                if value < min || value > max {
                    return Err(format!("{} must be between {} and {}", name, min, max));
                }
                Ok(FieldValue::Decimal(value))
            },
            FieldRule::Boolean => parse_bool(raw)
                .map(FieldValue::Boolean)
                .ok_or_else(|| format!("{} must be true or false, got: {}", name, raw)),
            FieldRule::Reference(kind) => {
                if references.contains(kind, raw) {
                    Ok(FieldValue::Reference {
                        kind,
                        code: raw.to_string(),
                    })
                } else {
                    Err(format!("{} code {} does not exist", capitalize(kind.as_str()), raw))
                }
            },
        }
    }
}

fn check_cross_rule(rule: &CrossRule, row: &ValidatedRow) -> Option<FieldError> {
    match rule {
        CrossRule::NotGreaterThan { column, limit } => {
            let (value, bound) = (row.integer(column)?, row.integer(limit)?);
            (value > bound).then(|| {
                FieldError::new(*column, format!("{} ({}) exceeds {} ({})", column, value, limit, bound))
            })
        },
        CrossRule::SumNotGreaterThan { columns, limit } => {
            let bound = row.integer(limit)?;
            let Some(sum) = columns
                .iter()
                .filter_map(|c| row.integer(c))
                .try_fold(0i64, i64::checked_add)
            else {
                return Some(FieldError::new(
                    *limit,
                    format!("sum of {} is out of range", columns.join(", ")),
                ));
            };
            (sum > bound).then(|| {
                FieldError::new(
                    *limit,
                    format!("sum of {} ({}) exceeds {} ({})", columns.join(", "), sum, limit, bound),
                )
            })
        },
    }
}

fn is_valid_email(raw: &str) -> bool {
    let Some((local, domain)) = raw.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !raw.chars().any(char::is_whitespace)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "t" | "y" => Some(true),
        "false" | "0" | "no" | "f" | "n" => Some(false),
        _ => None,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Fold several field errors into the `(field, message)` pair stored on a row error
pub fn summarize(errors: &[FieldError]) -> (Option<String>, String) {
    let mut fields: Vec<&str> = Vec::new();
    for error in errors {
        if !fields.contains(&error.field.as_str()) {
            fields.push(&error.field);
        }
    }
    let field = (!fields.is_empty()).then(|| fields.join(","));
    let message = errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    (field, message)
}

/// Tracks entity keys already seen in one input file
pub struct DuplicateTracker {
    schema: &'static ResourceSchema,
    seen: HashMap<String, i64>,
}

impl DuplicateTracker {
    pub fn new(schema: &'static ResourceSchema) -> Self {
        Self {
            schema,
            seen: HashMap::new(),
        }
    }

    /// Err if an earlier row in the same file already targeted this entity
    pub fn check(&mut self, row: &ValidatedRow) -> Result<(), FieldError> {
        let Some(key) = row.key(self.schema) else {
            return Ok(());
        };
        if let Some(first) = self.seen.get(&key) {
            return Err(FieldError::new(
                self.schema.key_columns.join(","),
                format!(
                    "Duplicate {} in file, first seen at row {}",
                    self.schema.key_columns.join(" + "),
                    first
                ),
            ));
        }
        self.seen.insert(key, row.number);
        Ok(())
    }
}
