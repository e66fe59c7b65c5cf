//! System handlers: health and OpenAPI.

use crate::api::AppState;
use crate::error::Result;
use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;

/// GET /health - Health check
///
/// Reports the crate version, whether new jobs are accepted and stored job counts.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "Database unavailable", body = crate::error::ApiError)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let jobs = state.control.job_counts().await?;

    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "accepting_jobs": state.control.is_accepting(),
        "jobs": jobs,
    })))
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/openapi.json",
    tag = "system",
    responses(
        (status = 200, description = "OpenAPI 3.1 specification in JSON format")
    )
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    Json(ApiDoc::openapi())
}
