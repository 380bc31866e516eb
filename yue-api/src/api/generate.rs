//! Generation endpoints
//!
//! POST /api/generate queues a job and returns immediately.
//! POST /api/generate/sync blocks until the job's worker finishes.
//! POST /api/generate/upload is the sync contract for multipart requests
//! carrying reference audio; the uploaded files live only as long as the job.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::jobs::CompletedJob;
use crate::params::{GenerateRequest, GenerationRequest};
use crate::staging::StagingArea;
use crate::AppState;

/// Upper bound on a multipart upload body
const UPLOAD_BODY_LIMIT: usize = 200 * 1024 * 1024;

/// POST /api/generate response
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub status: &'static str,
    pub message: String,
    pub job_id: Uuid,
    /// Where the job's files will appear
    pub output_dir: String,
    pub status_url: String,
}

/// POST /api/generate/sync response
#[derive(Debug, Serialize)]
pub struct SyncGenerateResponse {
    pub job_id: Uuid,
    /// Path of the newest generated file; null on failure
    pub artifact: Option<String>,
    pub artifact_url: Option<String>,
    pub file_count: usize,
    /// Human-readable status text
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Download URL for a job artifact
pub fn artifact_url(job_id: Uuid, file_name: &str) -> String {
    format!("/api/output/{}/{}", job_id, file_name)
}

fn validated(
    state: &AppState,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> ApiResult<GenerationRequest> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    validate(state, request)
}

fn validate(state: &AppState, request: GenerateRequest) -> ApiResult<GenerationRequest> {
    request.validate(&state.config.inference).map_err(|e| {
        tracing::info!(field = e.field, error = %e.message, "Rejected generation request");
        ApiError::from(e)
    })
}

/// POST /api/generate
pub async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> ApiResult<Json<AcceptedResponse>> {
    let request = validated(&state, payload)?;
    let record = state.queue.submit(request).await?;

    Ok(Json(AcceptedResponse {
        status: "accepted",
        message: "Generation started. Poll status_url for progress; files appear in output_dir.".to_string(),
        job_id: record.job_id,
        output_dir: record.output_dir.display().to_string(),
        status_url: format!("/api/jobs/{}", record.job_id),
    }))
}

/// POST /api/generate/sync
///
/// Failures after validation still return the response body shape, with
/// `artifact` null and the status text carrying stderr and the command.
pub async fn generate_sync(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SyncGenerateResponse>)> {
    let request = validated(&state, payload)?;
    let completed = state.queue.submit_and_wait(request).await?;
    Ok(sync_response(completed))
}

/// POST /api/generate/upload
///
/// Multipart form with a `request` part holding the JSON payload and
/// optional `audio_prompt_file`, `vocal_track_prompt_file` and
/// `instrumental_track_prompt_file` parts. Each uploaded file replaces the
/// matching path field; the prompt flags in `request` still decide which
/// files are used.
pub async fn generate_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SyncGenerateResponse>)> {
    let mut request: Option<GenerateRequest> = None;
    let mut uploads = StagingArea::new(state.config.inference.staging_dir());
    let mut stored: Vec<(&'static str, String)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;

        let label = match name.as_str() {
            "request" => {
                let parsed = serde_json::from_slice(&bytes)
                    .map_err(|e| ApiError::BadRequest(format!("Invalid request part: {}", e)))?;
                request = Some(parsed);
                continue;
            }
            "audio_prompt_file" => "prompt",
            "vocal_track_prompt_file" => "vocal",
            "instrumental_track_prompt_file" => "instrumental",
            other => return Err(ApiError::BadRequest(format!("Unexpected form field: {}", other))),
        };
        // Browsers send an empty part for a file input left blank
        if bytes.is_empty() {
            continue;
        }

        let path = uploads.stage_upload(label, file_name.as_deref(), &bytes)?;
        tracing::debug!(label, bytes = bytes.len(), path = %path.display(), "Stored uploaded prompt audio");
        stored.push((label, path.display().to_string()));
    }

    let mut request =
        request.ok_or_else(|| ApiError::BadRequest("Missing form field: request".to_string()))?;
    for (label, path) in stored {
        match label {
            "prompt" => request.audio_prompt_path = Some(path),
            "vocal" => request.vocal_track_prompt_path = Some(path),
            _ => request.instrumental_track_prompt_path = Some(path),
        }
    }

    let request = validate(&state, request)?;
    let completed = state.queue.submit_and_wait_with_uploads(request, uploads).await?;
    Ok(sync_response(completed))
}

fn sync_response(completed: CompletedJob) -> (StatusCode, Json<SyncGenerateResponse>) {
    let job_id = completed.record.job_id;

    let (status, body) = match completed.outcome {
        Ok(outcome) => {
            let file_name = outcome.artifact.file_name();
            (
                StatusCode::OK,
                SyncGenerateResponse {
                    job_id,
                    artifact: Some(outcome.artifact.path.display().to_string()),
                    artifact_url: Some(artifact_url(job_id, &file_name)),
                    file_count: outcome.file_count,
                    status: outcome.status_text(),
                    error_code: None,
                },
            )
        }
        Err(error) => {
            let status = if error.is_cancelled() {
                StatusCode::CONFLICT
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (
                status,
                SyncGenerateResponse {
                    job_id,
                    artifact: None,
                    artifact_url: None,
                    file_count: 0,
                    status: error.status_text(),
                    error_code: Some(error.code().to_string()),
                },
            )
        }
    };

    (status, Json(body))
}

pub fn generate_routes() -> Router<AppState> {
    Router::new()
        .route("/api/generate", post(generate))
        .route("/api/generate/sync", post(generate_sync))
        .route(
            "/api/generate/upload",
            post(generate_upload).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
}
