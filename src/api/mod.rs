//! REST API server module
//!
//! Provides an OpenAPI 3.1 compliant REST API for starting crawl jobs, steering them with
//! pause/resume/cancel/retry, and following their progress live over Server-Sent Events.

use crate::{Config, CrawlControl, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Where Swagger UI loads the OpenAPI document from
pub const SWAGGER_DOC_PATH: &str = "/api-docs/openapi.json";

/// Create the API router with all route definitions
///
/// Routes are mounted at the router root, which is also where [`start_api_server`] serves them
/// and what the OpenAPI `servers` entry points at.
///
/// # Routes
///
/// ## Jobs
/// - `POST /jobs` - Start a crawl for a knowledge base
/// - `GET /jobs/:id` - Get a job's current record
/// - `POST /jobs/:id/pause` - Pause a job
/// - `POST /jobs/:id/resume` - Resume a job
/// - `POST /jobs/:id/cancel` - Cancel a job
/// - `POST /jobs/:id/retry` - Retry a canceled or failed job as a new generation
/// - `GET /jobs/:id/stream` - Server-sent events stream of job snapshots
///
/// ## Knowledge Bases
/// - `GET /bases/:base_id/jobs` - Every generation for a knowledge base, newest first
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive Swagger UI documentation (if enabled)
pub fn create_router(control: Arc<CrawlControl>, config: Arc<Config>) -> Router {
    let state = AppState::new(control, config.clone());

    let router = Router::new()
        // Jobs
        .route("/jobs", post(routes::start_job))
        .route("/jobs/:id", get(routes::get_job))
        .route("/jobs/:id/pause", post(routes::pause_job))
        .route("/jobs/:id/resume", post(routes::resume_job))
        .route("/jobs/:id/cancel", post(routes::cancel_job))
        .route("/jobs/:id/retry", post(routes::retry_job))
        .route("/jobs/:id/stream", get(routes::job_stream))
        // Knowledge Bases
        .route("/bases/:base_id/jobs", get(routes::list_base_jobs))
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec));

    // Merge Swagger UI routes if enabled in config (before applying state)
    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url(SWAGGER_DOC_PATH, ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state).layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        let cors = build_cors_layer(&config.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` (or an empty list) allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Runs until the server stops.
///
/// # Example
///
/// ```no_run
/// use crawl_control::{Config, CrawlControl, CrawlerFactory, KnownBases};
/// use std::sync::Arc;
///
/// # async fn example(factory: Arc<dyn CrawlerFactory>) -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(Config::default());
/// let bases = Arc::new(KnownBases::default());
/// let control =
///     Arc::new(CrawlControl::with_local_workers((*config).clone(), factory, bases).await?);
///
/// // Start API server (blocks until shutdown)
/// crawl_control::api::start_api_server(control, config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(control: Arc<CrawlControl>, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(control, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
