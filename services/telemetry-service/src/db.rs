use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection};

use crate::models::{RollupRow, TelemetryRecord};

const SQL_CREATE_TELEMETRY: &str = "CREATE TABLE IF NOT EXISTS telemetry (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    ts_ms INTEGER NOT NULL,
    sequence TEXT NOT NULL,
    regime TEXT NOT NULL,
    mode INTEGER NOT NULL,
    score REAL NOT NULL,
    distance REAL NOT NULL,
    alert_level INTEGER NOT NULL,
    atr_multiple REAL NOT NULL,
    signal TEXT NOT NULL,
    raw TEXT NOT NULL,
    received_at INTEGER NOT NULL
)";
const SQL_CREATE_IDX_TS: &str = "CREATE INDEX IF NOT EXISTS idx_telemetry_ts ON telemetry (ts_ms)";
const SQL_CREATE_IDX_SYM_TF: &str =
    "CREATE INDEX IF NOT EXISTS idx_telemetry_sym_tf ON telemetry (symbol, timeframe)";

const SQL_INSERT_TELEMETRY: &str = "INSERT INTO telemetry \
(version, symbol, timeframe, ts_ms, sequence, regime, mode, score, distance, alert_level, atr_multiple, signal, raw, received_at) \
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)";

const SQL_COUNT: &str = "SELECT COUNT(*) FROM telemetry";

// Retried deliveries share a ts_ms, so last-seen is the newest received_at
// across the whole feed, not the one on the row picked for the payload.
const SQL_LATEST_PER_FEED: &str = "SELECT symbol, timeframe, ts_ms, last_received_at, \
sequence, regime, mode, score, distance, alert_level, atr_multiple, signal \
FROM (SELECT *, \
ROW_NUMBER() OVER (PARTITION BY symbol, timeframe ORDER BY ts_ms DESC, received_at DESC, id DESC) AS rn, \
MAX(received_at) OVER (PARTITION BY symbol, timeframe) AS last_received_at \
FROM telemetry \
WHERE (?1 IS NULL OR signal = ?1) AND (?2 IS NULL OR symbol = ?2) AND (?3 IS NULL OR timeframe = ?3)) \
WHERE rn = 1 ORDER BY symbol, timeframe";

const SQL_ROLLUP_BUCKETS: &str = "SELECT symbol, timeframe, (ts_ms / ?1) * ?1 AS bucket, COUNT(*), \
SUM(CASE WHEN signal = ?2 THEN 1 ELSE 0 END), \
AVG(score), MIN(score), MAX(score), AVG(distance), AVG(atr_multiple), MAX(alert_level) \
FROM telemetry \
WHERE ts_ms >= ?3 AND (?4 IS NULL OR symbol = ?4) AND (?5 IS NULL OR timeframe = ?5) \
GROUP BY symbol, timeframe, bucket ORDER BY symbol, timeframe, bucket";

const SQL_ROLLUP_BY_SIG: &str = "SELECT signal, COUNT(*) FROM telemetry \
WHERE ts_ms >= ?1 AND (?2 IS NULL OR symbol = ?2) AND (?3 IS NULL OR timeframe = ?3) \
GROUP BY signal";

/// Latest row of one feed, before staleness is judged.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRow {
    pub symbol: String,
    pub timeframe: String,
    pub last_ts_ms: i64,
    pub last_received_at: i64,
    pub sequence: String,
    pub regime: String,
    pub mode: i64,
    pub score: f64,
    pub distance: f64,
    pub alert_level: i64,
    pub atr_multiple: f64,
    pub signal: String,
}

pub struct RollupQuery<'a> {
    pub symbol: Option<&'a str>,
    pub timeframe: Option<&'a str>,
    pub since_ms: i64,
    pub bucket_ms: i64,
    pub heartbeat_signal: &'a str,
}

pub fn open(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    // WAL lets the read endpoints run while an insert holds the write lock.
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    tracing::debug!(path = %path.display(), journal_mode = %mode, "database opened");
    conn.busy_timeout(Duration::from_secs(5))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "{SQL_CREATE_TELEMETRY};\n{SQL_CREATE_IDX_TS};\n{SQL_CREATE_IDX_SYM_TF};"
    ))
}

pub fn ping(conn: &Connection) -> rusqlite::Result<()> {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    Ok(())
}

pub fn insert_telemetry(
    conn: &Connection,
    record: &TelemetryRecord,
    raw: &str,
    received_at: i64,
) -> rusqlite::Result<i64> {
    conn.prepare_cached(SQL_INSERT_TELEMETRY)?.execute(params![
        record.version,
        record.symbol,
        record.timeframe,
        record.timestamp,
        record.sequence,
        record.regime,
        record.mode,
        record.score,
        record.distance,
        record.alert_level,
        record.atr_multiple,
        record.signal,
        raw,
        received_at,
    ])?;
    Ok(conn.last_insert_rowid())
}

pub fn count_rows(conn: &Connection) -> rusqlite::Result<u64> {
    let count: i64 = conn.query_row(SQL_COUNT, [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

pub fn latest_per_feed(
    conn: &Connection,
    signal: Option<&str>,
    symbol: Option<&str>,
    timeframe: Option<&str>,
) -> rusqlite::Result<Vec<FeedRow>> {
    let mut stmt = conn.prepare_cached(SQL_LATEST_PER_FEED)?;
    let rows = stmt.query_map(params![signal, symbol, timeframe], |row| {
        Ok(FeedRow {
            symbol: row.get(0)?,
            timeframe: row.get(1)?,
            last_ts_ms: row.get(2)?,
            last_received_at: row.get(3)?,
            sequence: row.get(4)?,
            regime: row.get(5)?,
            mode: row.get(6)?,
            score: row.get(7)?,
            distance: row.get(8)?,
            alert_level: row.get(9)?,
            atr_multiple: row.get(10)?,
            signal: row.get(11)?,
        })
    })?;
    rows.collect()
}

pub fn rollup_buckets(conn: &Connection, query: &RollupQuery<'_>) -> rusqlite::Result<Vec<RollupRow>> {
    let mut stmt = conn.prepare_cached(SQL_ROLLUP_BUCKETS)?;
    let rows = stmt.query_map(
        params![
            query.bucket_ms,
            query.heartbeat_signal,
            query.since_ms,
            query.symbol,
            query.timeframe
        ],
        |row| {
            let count: i64 = row.get(3)?;
            let heartbeats: i64 = row.get(4)?;
            Ok(RollupRow {
                symbol: row.get(0)?,
                timeframe: row.get(1)?,
                bucket_start_ms: row.get(2)?,
                count: count.max(0) as u64,
                heartbeats: heartbeats.max(0) as u64,
                avg_score: row.get(5)?,
                min_score: row.get(6)?,
                max_score: row.get(7)?,
                avg_distance: row.get(8)?,
                avg_atr_multiple: row.get(9)?,
                max_alert_level: row.get(10)?,
            })
        },
    )?;
    rows.collect()
}

pub fn rollup_by_signal(
    conn: &Connection,
    query: &RollupQuery<'_>,
) -> rusqlite::Result<BTreeMap<String, u64>> {
    let mut stmt = conn.prepare_cached(SQL_ROLLUP_BY_SIG)?;
    let rows = stmt.query_map(params![query.since_ms, query.symbol, query.timeframe], |row| {
        let count: i64 = row.get(1)?;
        Ok((row.get::<_, String>(0)?, count.max(0) as u64))
    })?;
    rows.collect()
}
