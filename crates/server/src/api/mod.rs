//! HTTP endpoints, grouped by concern.
//!
//! Shared response types live here in mod.rs.

mod cases;
mod health;
mod progress;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) fn error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// Flat `api::foo` paths for route registration.
pub use cases::{case_by_id, cases_list, cases_summary};
pub use health::{health, loader_status, ready};
pub use progress::{progress, progress_stream};
