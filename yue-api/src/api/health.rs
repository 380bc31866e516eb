//! Health check and service info endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// Module name ("yue-api")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Last generation failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EndpointInfo {
    pub method: &'static str,
    pub path: &'static str,
    pub description: &'static str,
}

/// GET /api response
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub workers: Vec<String>,
    pub endpoints: Vec<EndpointInfo>,
}

const ENDPOINTS: &[(&str, &str, &str)] = &[
    ("GET", "/health", "Health check"),
    ("GET", "/api", "Service info"),
    ("GET", "/api/models", "Supported stage-1 and stage-2 models"),
    ("GET", "/api/tags", "Suggested genre tags"),
    ("POST", "/api/generate", "Queue a generation job"),
    ("POST", "/api/generate/sync", "Generate and wait for the artifact"),
    ("POST", "/api/generate/upload", "Generate from a multipart form with reference audio"),
    ("GET", "/api/jobs/:job_id", "Job status"),
    ("POST", "/api/jobs/:job_id/cancel", "Cancel a queued or running job"),
    ("GET", "/api/output/:filename", "Download the newest generated file with this name"),
    ("GET", "/api/output/:job_id/:filename", "Download a generated file"),
    ("GET", "/", "Browser UI"),
];

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "yue-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        last_error: state.queue.last_error().await,
    })
}

/// GET /api
pub async fn service_info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: "YuE Music Generation API",
        version: env!("CARGO_PKG_VERSION"),
        description: "Lyrics-to-song generation front end for the YuE inference pipeline",
        workers: state.config.inference.cuda_devices.clone(),
        endpoints: ENDPOINTS
            .iter()
            .map(|&(method, path, description)| EndpointInfo {
                method,
                path,
                description,
            })
            .collect(),
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api", get(service_info))
}
