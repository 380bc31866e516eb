//! yue-api library interface
//!
//! REST front end for the YuE inference pipeline. A validated request is
//! composed into an inference command line, free-text inputs are staged to
//! temporary files, the program runs on a per-device worker, and the newest
//! audio file in the job's output directory is reported back.

pub mod api;
pub mod command;
pub mod error;
pub mod jobs;
pub mod output;
pub mod params;
pub mod pipeline;
pub mod runner;
pub mod staging;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use yue_common::config::TomlConfig;

use crate::jobs::JobQueue;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Resolved bootstrap configuration
    pub config: Arc<TomlConfig>,
    /// Generation queue and job registry
    pub queue: JobQueue,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Build state and start one generation worker per configured device
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: TomlConfig) -> Self {
        let queue = JobQueue::start(Arc::new(config.inference.clone()));
        Self {
            config: Arc::new(config),
            queue,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::ui_routes())
        .merge(api::health_routes())
        .merge(api::catalog_routes())
        .merge(api::generate_routes())
        .merge(api::job_routes())
        .merge(api::output_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
