//! OpenAPI documentation and schema generation
//!
//! This module defines the OpenAPI specification for the crawl-control REST API
//! using utoipa for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the crawl-control REST API
///
/// The spec can be accessed via:
/// - `/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation (reads `/api-docs/openapi.json`)
#[derive(OpenApi)]
#[openapi(
    info(
        title = "crawl-control REST API",
        version = "0.1.0",
        description = "OpenAPI 3.1 compliant REST API for starting knowledge-base crawl jobs, steering them with pause/resume/cancel/retry, and following their progress live",
        contact(
            name = "crawl-control"
        ),
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790", description = "Local development server")
    ),
    paths(
        // Jobs
        crate::api::routes::start_job,
        crate::api::routes::get_job,
        crate::api::routes::pause_job,
        crate::api::routes::resume_job,
        crate::api::routes::cancel_job,
        crate::api::routes::retry_job,
        crate::api::routes::job_stream,

        // Knowledge Bases
        crate::api::routes::list_base_jobs,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        // Core types from types.rs
        crate::types::JobId,
        crate::types::BaseId,
        crate::types::JobStatus,
        crate::types::Command,
        crate::types::JobRecord,
        crate::types::ProgressDelta,
        crate::types::WorkerOutcome,
        crate::control::JobCounts,

        // Config types from config.rs
        crate::config::Config,
        crate::config::PersistenceConfig,
        crate::config::ApiConfig,
        crate::config::ProgressConfig,
        crate::config::WorkerConfig,
        crate::config::ReconnectConfig,

        // API request types
        crate::api::routes::StartJobRequest,

        // Error types from error.rs
        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "jobs", description = "Crawl jobs - Start, inspect, pause, resume, cancel, retry and stream snapshots"),
        (name = "bases", description = "Knowledge bases - Job history per knowledge base"),
        (name = "system", description = "System endpoints - Health checks and OpenAPI spec"),
    )
)]
pub struct ApiDoc;
