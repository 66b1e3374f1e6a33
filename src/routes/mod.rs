//! HTTP gateway: merges each endpoint's subrouter and attaches shared state.

use axum::Router;

use crate::pipeline::Pipeline;
use crate::scheduler::LatestRun;

mod get_readings;
mod health;
mod runs;

// ---

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub latest: LatestRun,
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(runs::router())
        .merge(get_readings::router())
        .merge(health::router())
        .with_state(state)
}
