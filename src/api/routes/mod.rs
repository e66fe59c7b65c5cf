//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`jobs`] — Single-job reads, commands and live snapshots
//! - [`bases`] — Per-knowledge-base job history
//! - [`system`] — Health and OpenAPI

use crate::error::{Error, JobError};
use crate::types::{BaseId, CrawlConfig, JobId};
use async_trait::async_trait;
use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};

mod bases;
mod jobs;
mod system;

// Re-export all handlers so `routes::function_name` works
pub use bases::*;
pub use jobs::*;
pub use system::*;

// ============================================================================
// Request Types (shared across handlers)
// ============================================================================

/// Request body for POST /jobs
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartJobRequest {
    /// Knowledge base to crawl
    pub base_id: BaseId,
    /// Crawl configuration handed to the worker (default: `{}`)
    #[serde(default)]
    #[schema(value_type = Object)]
    pub config: CrawlConfig,
}

// ============================================================================
// Extractors
// ============================================================================

/// `:id` path segment parsed as a [`JobId`]
///
/// A segment that is not a UUID cannot name any job, so it is rejected as `job_not_found`
/// (404) like any other unknown id.
#[derive(Debug, Clone, Copy)]
pub struct JobIdPath(pub JobId);

#[async_trait]
impl<S> FromRequestParts<S> for JobIdPath
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| malformed(parts.uri.path()))?;
        raw.parse::<JobId>()
            .map(JobIdPath)
            .map_err(|_| malformed(&raw))
    }
}

fn malformed(id: &str) -> Error {
    Error::Job(JobError::MalformedId { id: id.to_string() })
}
