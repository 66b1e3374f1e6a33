//! Stand-in weather provider served by axum on an ephemeral port.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;

pub const API_KEY: &str = "test-key";

/// Latitude the `/onecall` route answers with a 503 for.
pub const FAILING_LAT: &str = "51.5074";

#[derive(Clone, Default)]
pub struct ProviderState {
    pub hits: Arc<AtomicUsize>,
    pub last_query: Arc<std::sync::Mutex<HashMap<String, String>>>,
}

impl ProviderState {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Start the provider and return its base URL.
pub async fn spawn_provider(state: ProviderState) -> Result<String> {
    // ---
    let app = Router::new()
        .route("/onecall", get(onecall))
        .route(
            "/unavailable",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        )
        .route("/null", get(|| async { "null" }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "{}"
            }),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(format!("http://{addr}"))
}

async fn onecall(
    State(state): State<ProviderState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    // ---
    state.hits.fetch_add(1, Ordering::SeqCst);
    *state.last_query.lock().unwrap() = params.clone();

    if params.get("appid").map(String::as_str) != Some(API_KEY) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "cod": 401, "message": "Invalid API key" })),
        );
    }
    if params.get("lat").map(String::as_str) == Some(FAILING_LAT) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "cod": 503 })),
        );
    }

    let lat: f64 = params.get("lat").and_then(|v| v.parse().ok()).unwrap_or(0.0);
    let lon: f64 = params.get("lon").and_then(|v| v.parse().ok()).unwrap_or(0.0);

    (
        StatusCode::OK,
        Json(json!({
            "lat": lat,
            "lon": lon,
            "timezone": "America/New_York",
            "timezone_offset": -14400,
            "current": {
                "dt": 1625812800,
                "temp": 298.77,
                "feels_like": 298.77,
                "pressure": 1016,
                "humidity": 53,
                "dew_point": 288.71,
                "uvi": 0.89,
                "clouds": 40,
                "visibility": 10000,
                "wind_speed": 4.12,
                "wind_deg": 150,
                "weather": [{ "id": 801, "main": "Clouds", "description": "few clouds", "icon": "02d" }]
            },
            "hourly": [{ "dt": 1625816400, "temp": 299.1 }]
        })),
    )
}
