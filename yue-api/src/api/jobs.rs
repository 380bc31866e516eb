//! Job status and cancellation

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use super::parse_job_id;
use crate::error::{ApiError, ApiResult};
use crate::jobs::JobRecord;
use crate::AppState;

/// GET /api/jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    let job_id = parse_job_id(&job_id)?;
    state
        .queue
        .get(job_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))
}

/// POST /api/jobs/:job_id/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobRecord>> {
    let job_id = parse_job_id(&job_id)?;
    Ok(Json(state.queue.cancel(job_id).await?))
}

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/api/jobs/:job_id", get(get_job))
        .route("/api/jobs/:job_id/cancel", post(cancel_job))
}
