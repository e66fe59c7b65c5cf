//! Job handlers: start, read, commands and the live snapshot stream.

use super::{JobIdPath, StartJobRequest};
use crate::api::AppState;
use crate::error::Result;
use crate::types::{Command, JobId, JobRecord};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use std::convert::Infallible;
use tokio_stream::{Stream, StreamExt};

/// POST /jobs - Start a crawl for a knowledge base
#[utoipa::path(
    post,
    path = "/jobs",
    tag = "jobs",
    request_body = StartJobRequest,
    responses(
        (status = 201, description = "Job started", body = JobRecord),
        (status = 404, description = "Knowledge base not found", body = crate::error::ApiError),
        (status = 409, description = "Knowledge base already has an active job", body = crate::error::ApiError),
        (status = 503, description = "No worker available or shutting down", body = crate::error::ApiError)
    )
)]
pub async fn start_job(
    State(state): State<AppState>,
    Json(request): Json<StartJobRequest>,
) -> Result<(StatusCode, Json<JobRecord>)> {
    let record = state
        .control
        .start(&request.base_id, request.config)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /jobs/:id - Get a job's current record
#[utoipa::path(
    get,
    path = "/jobs/{id}",
    tag = "jobs",
    params(
        ("id" = String, Path, description = "Job ID (UUID)")
    ),
    responses(
        (status = 200, description = "Current job record", body = JobRecord),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn get_job(
    State(state): State<AppState>,
    JobIdPath(id): JobIdPath,
) -> Result<Json<JobRecord>> {
    state.control.get_job(id).map(Json)
}

/// POST /jobs/:id/pause - Pause a job
///
/// Pausing a job that is not running returns the unchanged record.
#[utoipa::path(
    post,
    path = "/jobs/{id}/pause",
    tag = "jobs",
    params(
        ("id" = String, Path, description = "Job ID (UUID)")
    ),
    responses(
        (status = 200, description = "Job record after the command", body = JobRecord),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn pause_job(
    State(state): State<AppState>,
    JobIdPath(id): JobIdPath,
) -> Result<Json<JobRecord>> {
    run_command(&state, id, Command::Pause).await
}

/// POST /jobs/:id/resume - Resume a job
#[utoipa::path(
    post,
    path = "/jobs/{id}/resume",
    tag = "jobs",
    params(
        ("id" = String, Path, description = "Job ID (UUID)")
    ),
    responses(
        (status = 200, description = "Job record after the command", body = JobRecord),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn resume_job(
    State(state): State<AppState>,
    JobIdPath(id): JobIdPath,
) -> Result<Json<JobRecord>> {
    run_command(&state, id, Command::Resume).await
}

/// POST /jobs/:id/cancel - Cancel a job
#[utoipa::path(
    post,
    path = "/jobs/{id}/cancel",
    tag = "jobs",
    params(
        ("id" = String, Path, description = "Job ID (UUID)")
    ),
    responses(
        (status = 200, description = "Job record after the command", body = JobRecord),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn cancel_job(
    State(state): State<AppState>,
    JobIdPath(id): JobIdPath,
) -> Result<Json<JobRecord>> {
    run_command(&state, id, Command::Cancel).await
}

/// POST /jobs/:id/retry - Retry a canceled or failed job
///
/// Returns the new generation's record. Retrying a done job returns it unchanged.
#[utoipa::path(
    post,
    path = "/jobs/{id}/retry",
    tag = "jobs",
    params(
        ("id" = String, Path, description = "Job ID (UUID)")
    ),
    responses(
        (status = 200, description = "New generation, or the unchanged record for a done job", body = JobRecord),
        (status = 404, description = "Job not found", body = crate::error::ApiError),
        (status = 409, description = "Job is still queued, running or paused", body = crate::error::ApiError),
        (status = 503, description = "No worker available or shutting down", body = crate::error::ApiError)
    )
)]
pub async fn retry_job(
    State(state): State<AppState>,
    JobIdPath(id): JobIdPath,
) -> Result<Json<JobRecord>> {
    run_command(&state, id, Command::Retry).await
}

async fn run_command(state: &AppState, id: JobId, command: Command) -> Result<Json<JobRecord>> {
    state.control.execute(id, command).await.map(Json)
}

/// GET /jobs/:id/stream - Server-sent events stream of job snapshots
///
/// Every message is a `snapshot` event whose data is the full job record and whose id is its
/// version. The stream closes after the terminal snapshot.
#[utoipa::path(
    get,
    path = "/jobs/{id}/stream",
    tag = "jobs",
    params(
        ("id" = String, Path, description = "Job ID (UUID)")
    ),
    responses(
        (status = 200, description = "Server-sent events stream (text/event-stream)", content_type = "text/event-stream"),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn job_stream(
    State(state): State<AppState>,
    JobIdPath(id): JobIdPath,
) -> Result<Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>>> {
    let snapshots = state.control.subscribe(id)?;

    let stream = snapshots.filter_map(|record| match serde_json::to_string(&record) {
        Ok(json) => Some(Ok(SseEvent::default()
            .event("snapshot")
            .id(record.version.to_string())
            .data(json))),
        Err(e) => {
            tracing::error!(job_id = %record.job_id, error = %e, "Failed to serialize snapshot");
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
