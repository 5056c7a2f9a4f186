use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::models::{HealthResponse, HeartbeatParams, IngestParams, ReadyResponse, RollupParams};
use crate::service::{self, now_ms, ServiceError};
use crate::state::AppState;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        service: "f34-gps",
        time_ms: now_ms(),
    })
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match service::ready(&state).await {
        Ok(()) => (StatusCode::OK, Json(ReadyResponse { ok: true })).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, Json(err.body)).into_response(),
    }
}

fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ServiceError> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| ServiceError::bad_request(rejection.body_text()))
}

pub async fn ingest(
    State(state): State<AppState>,
    query: Result<Query<IngestParams>, QueryRejection>,
    body: Bytes,
) -> impl IntoResponse {
    // An unreadable query string means no usable token.
    let token = query.ok().and_then(|Query(params)| params.token);
    match service::ingest(&state, token.as_deref(), &body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn heartbeat(
    State(state): State<AppState>,
    query: Result<Query<HeartbeatParams>, QueryRejection>,
) -> impl IntoResponse {
    let params = match query_params(query) {
        Ok(params) => params,
        Err(err) => return (err.status, Json(err.body)).into_response(),
    };
    match service::heartbeat_status(&state, params, now_ms()).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}

pub async fn rollup(
    State(state): State<AppState>,
    query: Result<Query<RollupParams>, QueryRejection>,
) -> impl IntoResponse {
    let params = match query_params(query) {
        Ok(params) => params,
        Err(err) => return (err.status, Json(err.body)).into_response(),
    };
    match service::rollup(&state, params, now_ms()).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => (err.status, Json(err.body)).into_response(),
    }
}
