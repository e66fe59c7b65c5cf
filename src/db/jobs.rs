//! Crawl job record CRUD operations.

use crate::error::DatabaseError;
use crate::types::{CrawlConfig, JobId, JobRecord};
use crate::{Error, Result};

use super::{Database, JobRow, StoredJob};

const JOB_COLUMNS: &str = r#"
    id, base_id, status, fetched, extracted, saved, failed,
    last_url, last_error, created_at, updated_at, version, config, retry_of
"#;

impl Database {
    /// Insert a newly created job record
    pub async fn insert_job(
        &self,
        record: &JobRecord,
        config: &CrawlConfig,
        retry_of: Option<JobId>,
    ) -> Result<()> {
        let config_json = serde_json::to_string(config)?;

        sqlx::query(
            r#"
            INSERT INTO crawl_jobs (
                id, base_id, status, fetched, extracted, saved, failed,
                last_url, last_error, created_at, updated_at, version, config, retry_of
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.job_id)
        .bind(record.base_id.as_str())
        .bind(record.status.to_i32())
        .bind(record.fetched as i64)
        .bind(record.extracted as i64)
        .bind(record.saved as i64)
        .bind(record.failed as i64)
        .bind(&record.last_url)
        .bind(&record.last_error)
        .bind(record.created_at.timestamp_micros())
        .bind(record.updated_at.timestamp_micros())
        .bind(record.version as i64)
        .bind(config_json)
        .bind(retry_of)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert job: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Write a mutated record
    ///
    /// The write only lands if `record.version` is newer than the stored version; otherwise
    /// [`DatabaseError::StaleWrite`] is returned and the row is left alone.
    pub async fn update_job(&self, record: &JobRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs SET
                status = ?, fetched = ?, extracted = ?, saved = ?, failed = ?,
                last_url = ?, last_error = ?, updated_at = ?, version = ?
            WHERE id = ? AND version < ?
            "#,
        )
        .bind(record.status.to_i32())
        .bind(record.fetched as i64)
        .bind(record.extracted as i64)
        .bind(record.saved as i64)
        .bind(record.failed as i64)
        .bind(&record.last_url)
        .bind(&record.last_error)
        .bind(record.updated_at.timestamp_micros())
        .bind(record.version as i64)
        .bind(record.job_id)
        .bind(record.version as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update job: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::StaleWrite {
                id: record.job_id,
                version: record.version,
            }));
        }

        Ok(())
    }

    /// List every job, oldest first
    pub async fn list_jobs(&self) -> Result<Vec<StoredJob>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM crawl_jobs ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list jobs: {}",
                e
            )))
        })?;

        rows.into_iter().map(StoredJob::try_from).collect()
    }

    /// Count jobs per status code
    pub async fn count_jobs_by_status(&self) -> Result<Vec<(i32, i64)>> {
        let rows: Vec<(i32, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM crawl_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to count jobs: {}",
                        e
                    )))
                })?;

        Ok(rows)
    }
}
