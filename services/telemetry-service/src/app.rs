use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{health, heartbeat, ingest, readyz, rollup};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/readyz", get(readyz))
        .route("/telem", post(ingest).layer(DefaultBodyLimit::max(body_limit)))
        .route("/metrics/heartbeat", get(heartbeat))
        .route("/metrics/rollup", get(rollup))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
