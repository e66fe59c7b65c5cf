//! Error types for crawl-control
//!
//! This module provides:
//! - Domain error types (job registry, database, worker availability)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use crate::types::{BaseId, Command, JobId, JobStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for crawl-control operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for crawl-control
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "database_path")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Job registry error
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// The crawl dispatcher could not accept the job
    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// Knowledge base does not exist
    #[error("knowledge base {0} not found")]
    KnowledgeBaseNotFound(BaseId),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A stored row could not be turned back into a record
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// An update carried a version not newer than the stored one
    #[error("stale write for job {id}: version {version} is not newer than the stored record")]
    StaleWrite {
        /// Job the write targeted
        id: JobId,
        /// Version the rejected write carried
        version: u64,
    },
}

/// Job registry errors
#[derive(Debug, Error)]
pub enum JobError {
    /// Job ID is unknown
    #[error("job {id} not found")]
    NotFound {
        /// The job ID that was not found
        id: JobId,
    },

    /// A path segment that cannot name any job
    #[error("job {id} not found")]
    MalformedId {
        /// The segment as received
        id: String,
    },

    /// The knowledge base already has an active job
    #[error("knowledge base {base_id} already has an active job")]
    Conflict {
        /// Knowledge base the create targeted
        base_id: BaseId,
        /// The active job, if it has been recorded yet
        active_job_id: Option<JobId>,
    },

    /// The command is not allowed in the job's current status
    #[error("cannot {command} job {id} while it is {current_status}")]
    InvalidTransition {
        /// The job the command targeted
        id: JobId,
        /// The rejected command
        command: Command,
        /// Status that prevents the command
        current_status: JobStatus,
    },
}

impl Error {
    /// Shorthand for `Error::Job(JobError::NotFound { id })`
    pub fn job_not_found(id: JobId) -> Self {
        Error::Job(JobError::NotFound { id })
    }

    /// True when this error means the job ID is unknown
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Job(JobError::NotFound { .. } | JobError::MalformedId { .. })
        )
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "job_not_found",
///     "message": "job error: job 0192... not found",
///     "details": {
///       "job_id": "0192..."
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "job_not_found", "invalid_transition")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Error::Config { .. } => 400,
            Error::Serialization(_) => 400,

            // 404 Not Found
            Error::Job(JobError::NotFound { .. }) => 404,
            Error::Job(JobError::MalformedId { .. }) => 404,
            Error::KnowledgeBaseNotFound(_) => 404,

            // 409 Conflict
            Error::Job(JobError::Conflict { .. }) => 409,
            Error::Job(JobError::InvalidTransition { .. }) => 409,

            // 500 Internal Server Error
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway
            Error::Network(_) => 502,

            // 503 Service Unavailable
            Error::WorkerUnavailable(_) => 503,
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Job(e) => match e {
                JobError::NotFound { .. } | JobError::MalformedId { .. } => "job_not_found",
                JobError::Conflict { .. } => "conflict",
                JobError::InvalidTransition { .. } => "invalid_transition",
            },
            Error::WorkerUnavailable(_) => "worker_unavailable",
            Error::KnowledgeBaseNotFound(_) => "knowledge_base_not_found",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Job(JobError::NotFound { id }) => Some(serde_json::json!({
                "job_id": id,
            })),
            Error::Job(JobError::MalformedId { id }) => Some(serde_json::json!({
                "job_id": id,
            })),
            Error::Job(JobError::Conflict {
                base_id,
                active_job_id,
            }) => Some(serde_json::json!({
                "base_id": base_id,
                "active_job_id": active_job_id,
            })),
            Error::Job(JobError::InvalidTransition {
                id,
                command,
                current_status,
            }) => Some(serde_json::json!({
                "job_id": id,
                "command": command,
                "current_status": current_status,
            })),
            Error::KnowledgeBaseNotFound(base_id) => Some(serde_json::json!({
                "base_id": base_id,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
