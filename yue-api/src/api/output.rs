//! Artifact download
//!
//! Only files with a recognized audio extension are served, and only by
//! bare file name: names containing path separators or `..` are rejected.
//! The job-scoped route is exact; the name-only route picks the newest
//! match across all jobs.

use std::path::{Path as FsPath, PathBuf};

use axum::{
    extract::{Path, Request, State},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use super::parse_job_id;
use crate::error::{ApiError, ApiResult};
use crate::output::OutputResolver;
use crate::pipeline::job_output_dir;
use crate::AppState;

/// Reject anything that is not a plain file name
pub fn check_file_name(name: &str) -> ApiResult<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(ApiError::BadRequest(format!("Invalid file name: {}", name)));
    }
    Ok(())
}

/// Newest artifact called `name` anywhere within the resolver's depth
fn locate(resolver: &OutputResolver, dir: &FsPath, name: &str) -> Option<PathBuf> {
    if !resolver.is_artifact(FsPath::new(name)) {
        return None;
    }
    resolver
        .scan(dir)
        .ok()?
        .iter()
        .find(|artifact| artifact.file_name() == name)
        .map(|artifact| artifact.path.clone())
}

async fn serve(path: PathBuf, request: Request) -> Response {
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

/// GET /api/output/:filename
///
/// Searches the output root and every job directory beneath it; when
/// several jobs produced the same name, the newest file wins.
pub async fn fetch_output(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    check_file_name(&filename)?;
    let inference = &state.config.inference;
    let resolver = OutputResolver::new(&inference.artifact_extensions, inference.scan_depth + 1);

    let path = locate(&resolver, &inference.output_dir, &filename)
        .ok_or_else(|| ApiError::NotFound(format!("File not found: {}", filename)))?;
    tracing::debug!(path = %path.display(), "Serving artifact");
    Ok(serve(path, request).await)
}

/// GET /api/output/:job_id/:filename
pub async fn fetch_job_output(
    State(state): State<AppState>,
    Path((job_id, filename)): Path<(String, String)>,
    request: Request,
) -> ApiResult<Response> {
    let job_id = parse_job_id(&job_id)?;
    check_file_name(&filename)?;
    let inference = &state.config.inference;
    let resolver = OutputResolver::from_config(inference);
    let dir = job_output_dir(&inference.output_dir, job_id);

    let path = locate(&resolver, &dir, &filename)
        .ok_or_else(|| ApiError::NotFound(format!("File not found: {}/{}", job_id, filename)))?;
    tracing::debug!(job_id = %job_id, path = %path.display(), "Serving artifact");
    Ok(serve(path, request).await)
}

pub fn output_routes() -> Router<AppState> {
    Router::new()
        .route("/api/output/:filename", get(fetch_output))
        .route("/api/output/:job_id/:filename", get(fetch_job_output))
}
