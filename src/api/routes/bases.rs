//! Knowledge-base handlers.

use crate::api::AppState;
use crate::types::{BaseId, JobRecord};
use axum::{
    Json,
    extract::{Path, State},
};

/// GET /bases/:base_id/jobs - Every generation for a knowledge base
///
/// Newest first; an unknown knowledge base yields an empty list.
#[utoipa::path(
    get,
    path = "/bases/{base_id}/jobs",
    tag = "bases",
    params(
        ("base_id" = String, Path, description = "Knowledge base ID")
    ),
    responses(
        (status = 200, description = "Jobs for the knowledge base, newest first", body = Vec<JobRecord>)
    )
)]
pub async fn list_base_jobs(
    State(state): State<AppState>,
    Path(base_id): Path<BaseId>,
) -> Json<Vec<JobRecord>> {
    Json(state.control.list_jobs(&base_id))
}
