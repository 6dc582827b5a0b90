//! Connection pool and database error helpers

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Error as SqlxError;
use std::time::Duration;

use crate::config::DatabaseConfig;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, SqlxError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> Result<(), SqlxError> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// Kind of constraint a failed statement ran into
#[derive(Debug)]
pub enum ConstraintViolation {
    Unique(Option<String>),
    ForeignKey(Option<String>),
    Check(Option<String>),
    /// Value the column cannot hold (SQLSTATE class 22, or a NOT NULL violation)
    InvalidData(String),
    Other(SqlxError),
}

/// SQLSTATE codes caused by the values of a statement rather than the server
pub fn is_data_exception(code: &str) -> bool {
    code.starts_with("22") || code == "23502"
}

pub fn check_constraint_violation(error: SqlxError) -> ConstraintViolation {
    if let SqlxError::Database(ref db_err) = error {
        let constraint = db_err.constraint().map(str::to_string);
        if db_err.is_unique_violation() {
            return ConstraintViolation::Unique(constraint);
        }
        if db_err.is_foreign_key_violation() {
            return ConstraintViolation::ForeignKey(constraint);
        }
        if db_err.is_check_violation() {
            return ConstraintViolation::Check(constraint);
        }
        if db_err.code().is_some_and(|code| is_data_exception(&code)) {
            return ConstraintViolation::InvalidData(db_err.message().to_string());
        }
    }
    ConstraintViolation::Other(error)
}
