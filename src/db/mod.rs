//! Database layer for crawl-control
//!
//! Handles SQLite persistence for crawl job records so that a returned record is durable and
//! history survives restarts.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`jobs`] — Crawl job record CRUD
//! - [`state`] — Runtime state (shutdown tracking)

use crate::error::DatabaseError;
use crate::types::{BaseId, CrawlConfig, JobId, JobRecord, JobStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod jobs;
mod migrations;
mod state;

/// Crawl job row from database
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    /// Job ID
    pub id: JobId,
    /// Owning knowledge base
    pub base_id: String,
    /// Status code (see [`JobStatus::to_i32`])
    pub status: i32,
    /// Pages fetched
    pub fetched: i64,
    /// Pages extracted
    pub extracted: i64,
    /// Pages saved
    pub saved: i64,
    /// Pages failed
    pub failed: i64,
    /// Most recently processed URL
    pub last_url: Option<String>,
    /// Most recent error
    pub last_error: Option<String>,
    /// Creation time in microseconds since the Unix epoch
    pub created_at: i64,
    /// Last mutation time in microseconds since the Unix epoch
    pub updated_at: i64,
    /// Record version
    pub version: i64,
    /// Crawl configuration as JSON text
    pub config: String,
    /// The terminal job this generation retried, if any
    pub retry_of: Option<JobId>,
}

/// A persisted job: the public record plus what the control plane needs to retry it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredJob {
    /// The job record as served to clients
    pub record: JobRecord,
    /// Configuration the job was submitted with
    pub config: CrawlConfig,
    /// The terminal job this generation retried, if any
    pub retry_of: Option<JobId>,
}

impl TryFrom<JobRow> for StoredJob {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self> {
        let created_at = micros_to_datetime(row.created_at, row.id, "created_at")?;
        let updated_at = micros_to_datetime(row.updated_at, row.id, "updated_at")?;
        let config = serde_json::from_str(&row.config).map_err(|e| {
            Error::Database(DatabaseError::CorruptRow(format!(
                "job {} has invalid config JSON: {}",
                row.id, e
            )))
        })?;

        Ok(StoredJob {
            record: JobRecord {
                job_id: row.id,
                base_id: BaseId(row.base_id),
                status: JobStatus::from_i32(row.status),
                fetched: row.fetched as u64,
                extracted: row.extracted as u64,
                saved: row.saved as u64,
                failed: row.failed as u64,
                last_url: row.last_url,
                last_error: row.last_error,
                created_at,
                updated_at,
                version: row.version as u64,
            },
            config: CrawlConfig(config),
            retry_of: row.retry_of,
        })
    }
}

fn micros_to_datetime(micros: i64, id: JobId, column: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        Error::Database(DatabaseError::CorruptRow(format!(
            "job {} has out-of-range {}: {}",
            id, column, micros
        )))
    })
}

/// Database handle for crawl-control
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
