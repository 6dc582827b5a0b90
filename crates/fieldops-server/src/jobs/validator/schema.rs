//! Static import schemas

use crate::jobs::reference::ReferenceKind;
use crate::jobs::types::Resource;

pub const WARD_CODE_PATTERN: &str = r"^[A-Z]{2}-AC-\d{3}-W-\d{3}$";

pub const USER_ROLES: &[&str] = &["admin", "manager", "analyst", "user", "volunteer", "viewer"];

/// How a single cell is checked and parsed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldRule {
    Text { max_len: usize },
    Email,
    Phone,
    Pattern { pattern: &'static str, example: &'static str },
    Choice(&'static [&'static str]),
    Integer { min: Option<i64>, max: Option<i64> },
    Decimal { min: f64, max: f64 },
    Boolean,
    /// Code that must exist among the parent entities of this kind
    Reference(ReferenceKind),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub required: bool,
    pub rule: FieldRule,
    /// Value used in the downloadable template
    pub sample: &'static str,
}

const fn required(name: &'static str, rule: FieldRule, sample: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        required: true,
        rule,
        sample,
    }
}

const fn optional(name: &'static str, rule: FieldRule, sample: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        required: false,
        rule,
        sample,
    }
}

/// Checks spanning several integer columns of one row
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CrossRule {
    NotGreaterThan {
        column: &'static str,
        limit: &'static str,
    },
    SumNotGreaterThan {
        columns: &'static [&'static str],
        limit: &'static str,
    },
}

#[derive(Debug)]
pub struct ResourceSchema {
    pub resource: Resource,
    pub columns: &'static [ColumnSpec],
    pub cross_rules: &'static [CrossRule],
    /// Columns identifying an existing entity for create-or-update
    pub key_columns: &'static [&'static str],
}

impl ResourceSchema {
    pub fn required_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().filter(|c| c.required).map(|c| c.name)
    }

    pub fn column(&self, name: &str) -> Option<&'static ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn reference_kinds(&self) -> Vec<ReferenceKind> {
        self.columns
            .iter()
            .filter_map(|c| match c.rule {
                FieldRule::Reference(kind) => Some(kind),
                _ => None,
            })
            .collect()
    }
}

/// Length of `app_users.email`
pub const MAX_EMAIL_LEN: usize = 320;

/// Upper bound for head counts (population, voters, booths)
pub const MAX_HEAD_COUNT: i64 = 2_000_000_000;

const NON_NEGATIVE: FieldRule = FieldRule::Integer {
    min: Some(0),
    max: Some(MAX_HEAD_COUNT),
};

static USERS: ResourceSchema = ResourceSchema {
    resource: Resource::Users,
    columns: &[
        required("name", FieldRule::Text { max_len: 200 }, "Asha Rao"),
        required("email", FieldRule::Email, "asha.rao@example.org"),
        required("role", FieldRule::Choice(USER_ROLES), "volunteer"),
        optional("phone", FieldRule::Phone, "+91 98450 12345"),
        optional("state_code", FieldRule::Reference(ReferenceKind::State), "KA"),
        optional(
            "district_code",
            FieldRule::Reference(ReferenceKind::District),
            "KA-BLR",
        ),
    ],
    cross_rules: &[],
    key_columns: &["email"],
};

static WARDS: ResourceSchema = ResourceSchema {
    resource: Resource::Wards,
    columns: &[
        required("name", FieldRule::Text { max_len: 200 }, "Jayanagar"),
        required(
            "code",
            FieldRule::Pattern {
                pattern: WARD_CODE_PATTERN,
                example: "KA-AC-150-W-001",
            },
            "KA-AC-150-W-001",
        ),
        required(
            "constituency_code",
            FieldRule::Reference(ReferenceKind::Constituency),
            "KA-AC-150",
        ),
        optional(
            "ward_number",
            FieldRule::Integer {
                min: Some(1),
                max: None,
            },
            "1",
        ),
        optional("population", NON_NEGATIVE, "52000"),
        optional("voter_count", NON_NEGATIVE, "38000"),
        optional("total_booths", NON_NEGATIVE, "34"),
        optional(
            "urbanization",
            FieldRule::Choice(&["urban", "semi_urban", "rural"]),
            "urban",
        ),
        optional(
            "income_level",
            FieldRule::Choice(&["low", "medium", "high"]),
            "medium",
        ),
        optional(
            "literacy_rate",
            FieldRule::Decimal {
                min: 0.0,
                max: 100.0,
            },
            "88.5",
        ),
    ],
    cross_rules: &[CrossRule::NotGreaterThan {
        column: "voter_count",
        limit: "population",
    }],
    key_columns: &["code"],
};

static POLLING_BOOTHS: ResourceSchema = ResourceSchema {
    resource: Resource::PollingBooths,
    columns: &[
        required(
            "constituency_code",
            FieldRule::Reference(ReferenceKind::Constituency),
            "KA-AC-150",
        ),
        required("booth_number", FieldRule::Text { max_len: 50 }, "101A"),
        required("name", FieldRule::Text { max_len: 300 }, "Government Primary School"),
        optional("ward_code", FieldRule::Reference(ReferenceKind::Ward), "KA-AC-150-W-001"),
        optional("address", FieldRule::Text { max_len: 500 }, "4th Block, Jayanagar"),
        optional(
            "latitude",
            FieldRule::Decimal {
                min: -90.0,
                max: 90.0,
            },
            "12.9250",
        ),
        optional(
            "longitude",
            FieldRule::Decimal {
                min: -180.0,
                max: 180.0,
            },
            "77.5938",
        ),
        optional("total_voters", NON_NEGATIVE, "1200"),
        optional("male_voters", NON_NEGATIVE, "610"),
        optional("female_voters", NON_NEGATIVE, "585"),
        optional("transgender_voters", NON_NEGATIVE, "5"),
        optional(
            "booth_type",
            FieldRule::Choice(&["regular", "auxiliary", "special"]),
            "regular",
        ),
        optional("is_accessible", FieldRule::Boolean, "true"),
        optional("is_active", FieldRule::Boolean, "true"),
        optional(
            "priority_level",
            FieldRule::Integer {
                min: Some(1),
                max: Some(5),
            },
            "3",
        ),
    ],
    cross_rules: &[CrossRule::SumNotGreaterThan {
        columns: &["male_voters", "female_voters", "transgender_voters"],
        limit: "total_voters",
    }],
    key_columns: &["constituency_code", "booth_number"],
};

/// Import schema for `resource`, if it can be imported
pub fn schema_for(resource: Resource) -> Option<&'static ResourceSchema> {
    match resource {
        Resource::Users => Some(&USERS),
        Resource::Wards => Some(&WARDS),
        Resource::PollingBooths => Some(&POLLING_BOOTHS),
        _ => None,
    }
}

/// Header line and one sample row for an import template
pub fn template_rows(resource: Resource) -> Option<(Vec<&'static str>, Vec<&'static str>)> {
    let schema = schema_for(resource)?;
    Some((
        schema.columns.iter().map(|c| c.name).collect(),
        schema.columns.iter().map(|c| c.sample).collect(),
    ))
}
