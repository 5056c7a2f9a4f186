use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One parsed alert message, stored verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub version: i64,
    pub symbol: String,
    pub timeframe: String,
    pub timestamp: i64,
    pub sequence: String,
    pub regime: String,
    pub mode: i64,
    pub score: f64,
    pub distance: f64,
    pub alert_level: i64,
    pub atr_multiple: f64,
    pub signal: String,
}

#[derive(Deserialize)]
pub struct IngestParams {
    pub token: Option<String>,
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub id: i64,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub time_ms: i64,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ok: bool,
}

#[derive(Deserialize, Default)]
pub struct HeartbeatParams {
    pub sym: Option<String>,
    pub tf: Option<String>,
    pub sig: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FeedStatus {
    pub symbol: String,
    pub timeframe: String,
    pub signal: String,
    pub last_ts_ms: i64,
    pub last_received_at: i64,
    pub age_ms: i64,
    pub stale: bool,
    pub sequence: String,
    pub regime: String,
    pub mode: i64,
    pub score: f64,
    pub distance: f64,
    pub alert_level: i64,
    pub atr_multiple: f64,
}

#[derive(Serialize)]
pub struct HeartbeatResponse {
    pub now_ms: i64,
    pub stale_after_ms: i64,
    pub feeds: Vec<FeedStatus>,
}

#[derive(Deserialize, Default)]
pub struct RollupParams {
    pub sym: Option<String>,
    pub tf: Option<String>,
    pub minutes: Option<u32>,
    pub bucket_minutes: Option<u32>,
}

/// Aggregate over one `(symbol, timeframe, bucket)` cell.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RollupRow {
    pub symbol: String,
    pub timeframe: String,
    pub bucket_start_ms: i64,
    pub count: u64,
    pub heartbeats: u64,
    pub avg_score: Option<f64>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub avg_distance: Option<f64>,
    pub avg_atr_multiple: Option<f64>,
    pub max_alert_level: Option<i64>,
}

#[derive(Serialize)]
pub struct RollupResponse {
    pub since_ms: i64,
    pub bucket_ms: i64,
    pub count: u64,
    pub by_sig: BTreeMap<String, u64>,
    pub rows: Vec<RollupRow>,
}

#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}
