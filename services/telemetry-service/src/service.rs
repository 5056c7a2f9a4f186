use axum::http::StatusCode;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

use crate::config::{MAX_BUCKET_MINUTES, MAX_ROLLUP_MINUTES};
use crate::db::{self, RollupQuery};
use crate::models::{
    ErrorResponse, FeedStatus, HeartbeatParams, HeartbeatResponse, IngestResponse, RollupParams,
    RollupResponse,
};
use crate::parser::{self, HEARTBEAT_SIGNAL};
use crate::state::AppState;

const ANY_SIGNAL: &str = "*";

pub struct ServiceError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ServiceError {
    pub fn new(status: StatusCode, code: &'static str, message: String) -> Self {
        Self {
            status,
            body: ErrorResponse { code, message },
        }
    }

    // Same body for a bad URL token and a bad shared secret.
    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "unauthorized".to_string(),
        )
    }

    pub fn bad_request(message: String) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn storage(err: rusqlite::Error) -> Self {
        tracing::error!(error = %err, "storage operation failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            "storage error".to_string(),
        )
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn secrets_match(given: &str, expected: &str) -> bool {
    given.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub async fn ingest(
    state: &AppState,
    token: Option<&str>,
    body: &[u8],
) -> Result<IngestResponse, ServiceError> {
    if !token.is_some_and(|token| secrets_match(token, &state.config.url_token)) {
        tracing::warn!(check = "url_token", "telemetry rejected");
        return Err(ServiceError::unauthorized());
    }

    // Alert webhooks post text/plain; stray invalid bytes are replaced.
    let raw = String::from_utf8_lossy(body);
    let raw = raw.trim();

    let parsed = parser::parse_telem(raw).map_err(|err| {
        tracing::warn!(error = %err, "telemetry rejected");
        ServiceError::bad_request(err.to_string())
    })?;

    if !secrets_match(&parsed.secret, &state.config.secret) {
        tracing::warn!(check = "shared_secret", sym = %parsed.record.symbol, "telemetry rejected");
        return Err(ServiceError::unauthorized());
    }

    let stored_raw = parser::redact_secret(raw);
    let received_at = now_ms();
    let id = {
        let db = state.db.lock().await;
        db::insert_telemetry(&db, &parsed.record, &stored_raw, received_at)
    }
    .map_err(ServiceError::storage)?;

    tracing::info!(
        id,
        sym = %parsed.record.symbol,
        tf = %parsed.record.timeframe,
        sig = %parsed.record.signal,
        ts_ms = parsed.record.timestamp,
        "telemetry stored"
    );

    Ok(IngestResponse { ok: true, id })
}

pub async fn ready(state: &AppState) -> Result<(), ServiceError> {
    let db = state.db.lock().await;
    db::ping(&db).map_err(ServiceError::storage)
}

pub async fn heartbeat_status(
    state: &AppState,
    params: HeartbeatParams,
    now_ms: i64,
) -> Result<HeartbeatResponse, ServiceError> {
    let symbol = non_empty(params.sym.as_deref());
    let timeframe = non_empty(params.tf.as_deref());
    let signal = match non_empty(params.sig.as_deref()) {
        None => Some(HEARTBEAT_SIGNAL),
        Some(ANY_SIGNAL) => None,
        Some(signal) => Some(signal),
    };

    let rows = {
        let db = state.db.lock().await;
        db::latest_per_feed(&db, signal, symbol, timeframe)
    }
    .map_err(ServiceError::storage)?;

    if rows.is_empty() && symbol.is_some() && timeframe.is_some() {
        return Err(ServiceError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            "no data".to_string(),
        ));
    }

    let stale_after_ms = i64::try_from(state.config.stale_after.as_millis()).unwrap_or(i64::MAX);
    let feeds = rows
        .into_iter()
        .map(|row| {
            let age_ms = now_ms.saturating_sub(row.last_received_at).max(0);
            FeedStatus {
                symbol: row.symbol,
                timeframe: row.timeframe,
                signal: row.signal,
                last_ts_ms: row.last_ts_ms,
                last_received_at: row.last_received_at,
                age_ms,
                stale: age_ms > stale_after_ms,
                sequence: row.sequence,
                regime: row.regime,
                mode: row.mode,
                score: row.score,
                distance: row.distance,
                alert_level: row.alert_level,
                atr_multiple: row.atr_multiple,
            }
        })
        .collect();

    Ok(HeartbeatResponse {
        now_ms,
        stale_after_ms,
        feeds,
    })
}

pub async fn rollup(
    state: &AppState,
    params: RollupParams,
    now_ms: i64,
) -> Result<RollupResponse, ServiceError> {
    let minutes = params.minutes.unwrap_or(state.config.rollup_minutes);
    if !(1..=MAX_ROLLUP_MINUTES).contains(&minutes) {
        return Err(ServiceError::bad_request(format!(
            "minutes must be between 1 and {MAX_ROLLUP_MINUTES}"
        )));
    }
    let bucket_minutes = params
        .bucket_minutes
        .unwrap_or(state.config.rollup_bucket_minutes);
    if !(1..=MAX_BUCKET_MINUTES).contains(&bucket_minutes) {
        return Err(ServiceError::bad_request(format!(
            "bucket_minutes must be between 1 and {MAX_BUCKET_MINUTES}"
        )));
    }

    let query = RollupQuery {
        symbol: non_empty(params.sym.as_deref()),
        timeframe: non_empty(params.tf.as_deref()),
        since_ms: now_ms - i64::from(minutes) * 60_000,
        bucket_ms: i64::from(bucket_minutes) * 60_000,
        heartbeat_signal: HEARTBEAT_SIGNAL,
    };

    let (rows, by_sig) = {
        let db = state.db.lock().await;
        db::rollup_buckets(&db, &query)
            .and_then(|rows| Ok((rows, db::rollup_by_signal(&db, &query)?)))
    }
    .map_err(ServiceError::storage)?;

    Ok(RollupResponse {
        since_ms: query.since_ms,
        bucket_ms: query.bucket_ms,
        count: by_sig.values().sum(),
        by_sig,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemConfig;
    use crate::db::tests::{memory_db, record};

    fn test_state() -> AppState {
        let config = TelemConfig::from_lookup(|key| match key {
            "TELEM_URL_TOKEN" => Some("tok".to_string()),
            "TELEM_SECRET" => Some("S1".to_string()),
            "TELEM_STALE_AFTER_SECS" => Some("60".to_string()),
            _ => None,
        })
        .unwrap();
        AppState::new(memory_db(), config)
    }

    async fn seed(state: &AppState, symbol: &str, ts_ms: i64, signal: &str, received_at: i64) {
        let db = state.db.lock().await;
        db::insert_telemetry(&db, &record(symbol, "1", ts_ms, signal), "raw", received_at).unwrap();
    }

    #[test]
    fn secret_comparison() {
        assert!(secrets_match("S1", "S1"));
        assert!(!secrets_match("S1", "S2"));
        assert!(!secrets_match("S1", "S10"));
        assert!(!secrets_match("", "S1"));
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let state = test_state();
        let err = ingest(&state, None, b"TELEM|v=2").await.err().unwrap();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn stored_raw_has_secret_redacted() {
        let state = test_state();
        let body = b"TELEM|v=2|sym=A|tf=1|t=1|sq=C|reg=X|m=1|sc=1|d=1|al=1|atrx=1|sig=HB|sec=S1";
        let response = ingest(&state, Some("tok"), body).await.ok().unwrap();

        let db = state.db.lock().await;
        let stored = db::tests::select_by_id(&db, response.id).unwrap().unwrap();
        assert!(stored.raw.ends_with("|sec=***"));
        assert!(!stored.raw.contains("S1"));
    }

    #[tokio::test]
    async fn padded_values_are_stored_as_sent() {
        let state = test_state();
        let body = b"TELEM|v=2|sym= KUCOIN:SOLUSDT |tf=1|t=1|sq=C |reg=X|m=1|sc=1|d=1|al=1|atrx=1|sig=HB|sec=S1";
        let response = ingest(&state, Some("tok"), body).await.ok().unwrap();

        let db = state.db.lock().await;
        let stored = db::tests::select_by_id(&db, response.id).unwrap().unwrap();
        assert_eq!(stored.record.symbol, " KUCOIN:SOLUSDT ");
        assert_eq!(stored.record.sequence, "C ");
        assert!(stored.raw.contains("|sym= KUCOIN:SOLUSDT |"));
    }

    #[tokio::test]
    async fn heartbeat_marks_stale_feeds() {
        let state = test_state();
        let now = 1_000_000;
        seed(&state, "FRESH", 1, "HB", now - 10_000).await;
        seed(&state, "OLD", 1, "HB", now - 120_000).await;

        let response = heartbeat_status(&state, HeartbeatParams::default(), now)
            .await
            .ok()
            .unwrap();
        assert_eq!(response.stale_after_ms, 60_000);
        assert_eq!(response.feeds.len(), 2);
        assert_eq!(response.feeds[0].symbol, "FRESH");
        assert!(!response.feeds[0].stale);
        assert_eq!(response.feeds[1].age_ms, 120_000);
        assert!(response.feeds[1].stale);
    }

    #[tokio::test]
    async fn retried_heartbeat_counts_as_fresh() {
        let state = test_state();
        let now = 10_000_000;
        seed(&state, "A", 5_000, "HB", now - 600_000).await;
        seed(&state, "A", 5_000, "HB", now - 1_000).await;

        let response = heartbeat_status(&state, HeartbeatParams::default(), now)
            .await
            .ok()
            .unwrap();
        assert_eq!(response.feeds.len(), 1);
        assert_eq!(response.feeds[0].last_received_at, now - 1_000);
        assert_eq!(response.feeds[0].age_ms, 1_000);
        assert!(!response.feeds[0].stale);
    }

    #[tokio::test]
    async fn heartbeat_for_unknown_feed_is_not_found() {
        let state = test_state();
        let params = HeartbeatParams {
            sym: Some("NOPE".to_string()),
            tf: Some("1".to_string()),
            sig: None,
        };
        let err = heartbeat_status(&state, params, 0).await.err().unwrap();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn heartbeat_wildcard_includes_other_signals() {
        let state = test_state();
        seed(&state, "A", 5_000, "L", 0).await;

        let only_hb = heartbeat_status(&state, HeartbeatParams::default(), 0)
            .await
            .ok()
            .unwrap();
        assert!(only_hb.feeds.is_empty());

        let params = HeartbeatParams {
            sig: Some("*".to_string()),
            ..HeartbeatParams::default()
        };
        let any = heartbeat_status(&state, params, 0).await.ok().unwrap();
        assert_eq!(any.feeds.len(), 1);
        assert_eq!(any.feeds[0].signal, "L");
    }

    #[tokio::test]
    async fn rollup_uses_window_and_defaults() {
        let state = test_state();
        let now = 10 * 60 * 60_000;
        seed(&state, "A", now - 5 * 60_000, "HB", 0).await;
        seed(&state, "A", now - 4 * 60_000, "L", 0).await;
        seed(&state, "A", now - 2 * 60 * 60_000, "HB", 0).await;

        let response = rollup(&state, RollupParams::default(), now).await.ok().unwrap();
        assert_eq!(response.since_ms, now - 60 * 60_000);
        assert_eq!(response.bucket_ms, 5 * 60_000);
        assert_eq!(response.count, 2);
        assert_eq!(response.by_sig.get("HB"), Some(&1));
        assert_eq!(response.by_sig.get("L"), Some(&1));
        assert_eq!(response.rows.iter().map(|row| row.count).sum::<u64>(), 2);
    }

    #[tokio::test]
    async fn rollup_rejects_out_of_range_window() {
        let state = test_state();
        let params = RollupParams {
            minutes: Some(0),
            ..RollupParams::default()
        };
        let err = rollup(&state, params, 0).await.err().unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
