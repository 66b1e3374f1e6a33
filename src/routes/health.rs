// src/routes/health.rs
//! Liveness endpoint for container orchestrators and the scheduler's
//! operators.
//!
//! Does not touch the database or the provider; it reports that the
//! process is serving and echoes the status of the latest finished run so
//! a stuck or failing schedule is visible at a glance.

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;
use crate::pipeline::RunStatus;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    last_run_status: Option<RunStatus>,
    last_run_finished_at: Option<DateTime<Utc>>,
}

/// Handle `GET /health`.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let latest = state.latest.read().await;
    Json(HealthResponse {
        status: "ok",
        last_run_status: latest.as_ref().map(|s| s.status),
        last_run_finished_at: latest.as_ref().map(|s| s.finished_at),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
