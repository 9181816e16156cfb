//! Liveness, readiness probe and loader status.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use casestats_loader::{ProgressState, Readiness, StatsSnapshot};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub readiness: Readiness,
    pub records: usize,
}

/// Liveness: always 200 while the process is serving.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        readiness: state.loader.readiness(),
        records: state.loader.len(),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: Readiness,
    pub ready: bool,
    pub records: usize,
    pub progress: ProgressState,
}

/// Readiness probe: 503 until the first full load has completed.
///
/// A `degraded` loader, or one resyncing after a completed load, still
/// answers 200 so traffic keeps flowing to the last known snapshot.
pub async fn ready(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadyResponse>) {
    let loader = &state.loader;
    let code = if loader.probe_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(ReadyResponse {
            status: loader.readiness(),
            ready: loader.is_ready(),
            records: loader.len(),
            progress: loader.progress(),
        }),
    )
}

#[derive(Serialize)]
pub struct LoaderStatusResponse {
    pub name: String,
    pub upstream: String,
    pub readiness: Readiness,
    pub probe_ok: bool,
    pub records: usize,
    pub progress: ProgressState,
    pub progress_subscribers: usize,
    pub stats: StatsSnapshot,
    pub config: serde_json::Value,
}

pub async fn loader_status(State(state): State<Arc<AppState>>) -> Json<LoaderStatusResponse> {
    let loader = &state.loader;
    Json(LoaderStatusResponse {
        name: loader.name().to_string(),
        upstream: loader.upstream(),
        readiness: loader.readiness(),
        probe_ok: loader.probe_ok(),
        records: loader.len(),
        progress: loader.progress(),
        progress_subscribers: loader.progress_subscribers(),
        stats: loader.stats(),
        config: state.config.redacted_summary(),
    })
}
