//! On-demand runs and the latest run summary.

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, routing::post, Json,
    Router,
};
use tracing::info;

use super::AppState;
use crate::pipeline::RunStatus;
use crate::scheduler::report;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/runs", post(trigger_run))
        .route("/runs/latest", get(latest_run))
}

/// `POST /runs`: run the pipeline now and return its summary.
async fn trigger_run(State(state): State<AppState>) -> impl IntoResponse {
    // ---
    info!("POST /runs - Starting manual run");

    let result = state.pipeline.run("manual").await;
    let summary = result.summary();
    report(&summary);
    *state.latest.write().await = Some(summary.clone());

    (status_code(summary.status), Json(summary))
}

/// `GET /runs/latest`: summary of the most recent finished run.
async fn latest_run(State(state): State<AppState>) -> impl IntoResponse {
    // ---
    match state.latest.read().await.clone() {
        Some(summary) => (StatusCode::OK, Json(summary)).into_response(),
        None => (StatusCode::NOT_FOUND, Json("No run has finished yet")).into_response(),
    }
}

fn status_code(status: RunStatus) -> StatusCode {
    match status {
        RunStatus::Succeeded => StatusCode::OK,
        RunStatus::PartiallyFailed => StatusCode::MULTI_STATUS,
        RunStatus::Failed => StatusCode::BAD_GATEWAY,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_status_codes() {
        // ---
        assert_eq!(status_code(RunStatus::Succeeded), StatusCode::OK);
        assert_eq!(status_code(RunStatus::PartiallyFailed), StatusCode::MULTI_STATUS);
        assert_eq!(status_code(RunStatus::Failed), StatusCode::BAD_GATEWAY);
    }
}
