//! HTTP API handlers for yue-api

pub mod catalog;
pub mod generate;
pub mod health;
pub mod jobs;
pub mod output;
pub mod ui;

pub use catalog::catalog_routes;
pub use generate::generate_routes;
pub use health::health_routes;
pub use jobs::job_routes;
pub use output::output_routes;
pub use ui::ui_routes;

use uuid::Uuid;

use crate::error::ApiError;

/// Parse a job id path segment, reporting malformed ids as 400
pub(crate) fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid job id: {}", raw)))
}
