//! Model catalog and genre tag suggestions

use std::path::Path;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use yue_common::models;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub stage1: Vec<&'static str>,
    pub stage2: Vec<&'static str>,
    /// Configured defaults used when a request names no model
    pub default_stage1: String,
    pub default_stage2: String,
    /// Stage-1 models that accept audio prompts
    pub audio_prompt_capable: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct TagsResponse {
    pub tags: Vec<String>,
}

/// GET /api/models
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let inference = &state.config.inference;
    Json(ModelsResponse {
        stage1: models::STAGE1_MODELS.to_vec(),
        stage2: models::STAGE2_MODELS.to_vec(),
        default_stage1: inference.stage1_model.clone(),
        default_stage2: inference.stage2_model.clone(),
        audio_prompt_capable: models::STAGE1_MODELS
            .iter()
            .copied()
            .filter(|m| models::supports_audio_prompt(m))
            .collect(),
    })
}

/// GET /api/tags
pub async fn list_tags(State(state): State<AppState>) -> Json<TagsResponse> {
    let tags = match &state.config.inference.tags_file {
        Some(path) => load_tags(path).await,
        None => Vec::new(),
    };
    Json(TagsResponse { tags })
}

/// Read a JSON array of tag strings; unreadable files yield no tags
pub async fn load_tags(path: &Path) -> Vec<String> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read tags file");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<String>>(&contents) {
        Ok(tags) => tags,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Tags file is not a JSON string array");
            Vec::new()
        }
    }
}

pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/api/models", get(list_models))
        .route("/api/tags", get(list_tags))
}
