//! Configuration management

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::jobs::runner::RunnerSettings;
use crate::storage::config::StorageConfig;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/fieldops";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Job Pipeline Constants
// ============================================================================

/// Number of jobs executed concurrently by the worker pool.
pub const DEFAULT_JOB_WORKERS: usize = 4;

/// Capacity of the submission queue.
pub const DEFAULT_JOB_QUEUE_CAPACITY: usize = 1024;

/// Rows processed between two checkpoints.
pub const DEFAULT_JOB_CHECKPOINT_ROWS: u64 = 100;

/// Maximum seconds between two checkpoints.
pub const DEFAULT_JOB_CHECKPOINT_INTERVAL_SECS: u64 = 2;

/// Wall-clock ceiling for a single job (1 hour).
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 3600;

/// How long finished jobs and their artifacts are kept.
pub const DEFAULT_JOB_RETENTION_HOURS: i64 = 24;

/// Interval between two expiry sweeps (1 hour).
pub const DEFAULT_JOB_REAPER_INTERVAL_SECS: u64 = 3600;

/// Largest accepted import upload (5 MiB).
pub const DEFAULT_JOB_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Largest accepted number of data rows in one import.
pub const DEFAULT_JOB_MAX_IMPORT_ROWS: u64 = 10_000;

/// Records fetched and rendered per export chunk.
pub const DEFAULT_JOB_EXPORT_CHUNK_SIZE: usize = 500;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub jobs: JobsConfig,
    pub storage: StorageConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Bulk job pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub checkpoint_rows: u64,
    pub checkpoint_interval_secs: u64,
    pub timeout_secs: u64,
    pub retention_hours: i64,
    pub reaper_interval_secs: u64,
    pub max_upload_bytes: usize,
    pub max_import_rows: u64,
    pub export_chunk_size: usize,
}

impl JobsConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            checkpoint_rows: self.checkpoint_rows,
            checkpoint_interval: Duration::from_secs(self.checkpoint_interval_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            retention: self.retention(),
            max_import_rows: self.max_import_rows,
            export_chunk_size: self.export_chunk_size,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_JOB_WORKERS,
            queue_capacity: DEFAULT_JOB_QUEUE_CAPACITY,
            checkpoint_rows: DEFAULT_JOB_CHECKPOINT_ROWS,
            checkpoint_interval_secs: DEFAULT_JOB_CHECKPOINT_INTERVAL_SECS,
            timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            retention_hours: DEFAULT_JOB_RETENTION_HOURS,
            reaper_interval_secs: DEFAULT_JOB_REAPER_INTERVAL_SECS,
            max_upload_bytes: DEFAULT_JOB_MAX_UPLOAD_BYTES,
            max_import_rows: DEFAULT_JOB_MAX_IMPORT_ROWS,
            export_chunk_size: DEFAULT_JOB_EXPORT_CHUNK_SIZE,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("FIELDOPS_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_or("FIELDOPS_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_or(
                    "FIELDOPS_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
            },
            cors: CorsConfig {
                allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_CORS_ALLOWED_ORIGIN.to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                allow_credentials: env_or("CORS_ALLOW_CREDENTIALS", true),
            },
            jobs: JobsConfig {
                workers: env_or("JOB_WORKERS", DEFAULT_JOB_WORKERS),
                queue_capacity: env_or("JOB_QUEUE_CAPACITY", DEFAULT_JOB_QUEUE_CAPACITY),
                checkpoint_rows: env_or("JOB_CHECKPOINT_ROWS", DEFAULT_JOB_CHECKPOINT_ROWS),
                checkpoint_interval_secs: env_or(
                    "JOB_CHECKPOINT_INTERVAL_SECS",
                    DEFAULT_JOB_CHECKPOINT_INTERVAL_SECS,
                ),
                timeout_secs: env_or("JOB_TIMEOUT_SECS", DEFAULT_JOB_TIMEOUT_SECS),
                retention_hours: env_or("JOB_RETENTION_HOURS", DEFAULT_JOB_RETENTION_HOURS),
                reaper_interval_secs: env_or(
                    "JOB_REAPER_INTERVAL_SECS",
                    DEFAULT_JOB_REAPER_INTERVAL_SECS,
                ),
                max_upload_bytes: env_or("JOB_MAX_UPLOAD_BYTES", DEFAULT_JOB_MAX_UPLOAD_BYTES),
                max_import_rows: env_or("JOB_MAX_IMPORT_ROWS", DEFAULT_JOB_MAX_IMPORT_ROWS),
                export_chunk_size: env_or(
                    "JOB_EXPORT_CHUNK_SIZE",
                    DEFAULT_JOB_EXPORT_CHUNK_SIZE,
                ),
            },
            storage: StorageConfig::from_env()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.jobs.workers == 0 {
            anyhow::bail!("JOB_WORKERS must be greater than 0");
        }

        if self.jobs.queue_capacity == 0 {
            anyhow::bail!("JOB_QUEUE_CAPACITY must be greater than 0");
        }

        if self.jobs.checkpoint_rows == 0 {
            anyhow::bail!("JOB_CHECKPOINT_ROWS must be greater than 0");
        }

        if self.jobs.export_chunk_size == 0 {
            anyhow::bail!("JOB_EXPORT_CHUNK_SIZE must be greater than 0");
        }

        if self.jobs.retention_hours <= 0 {
            anyhow::bail!("JOB_RETENTION_HOURS must be greater than 0");
        }

        if self.jobs.timeout_secs == 0 {
            anyhow::bail!("JOB_TIMEOUT_SECS must be greater than 0");
        }

        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            jobs: JobsConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}
