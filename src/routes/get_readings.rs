use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use serde::Deserialize;
use tracing::{error, info};

use super::AppState;
use crate::loader::RecordStore;

// ---

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/readings", get(handler))
}

/// Query parameters for listing stored readings
#[derive(Debug, Deserialize)]
pub struct ReadingsQuery {
    limit: Option<u32>,
    /// Condition category, e.g. `clouds`
    weather_main: Option<String>,
}

impl ReadingsQuery {
    fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

async fn handler(
    Query(params): Query<ReadingsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    info!("GET /readings {:?}", params);

    let store = state.pipeline.store();
    match store
        .recent(params.effective_limit(), params.weather_main.as_deref())
        .await
    {
        Ok(rows) => {
            info!("Returning {} readings", rows.len());
            (StatusCode::OK, Json(rows)).into_response()
        }
        Err(e) => {
            error!("Failed to read weather data: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to read weather data"),
            )
                .into_response()
        }
    }
}
