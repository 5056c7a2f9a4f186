//! Decoder for the pipe-delimited alert body:
//!
//! `TELEM|v=2|sym=KUCOIN:SOLUSDT|tf=1|t=1723824000000|...|sig=HB|sec=<secret>`
//!
//! Validation is all-or-nothing: either every required field is present and
//! well-typed, or the whole message is rejected.

use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;

use crate::models::TelemetryRecord;

pub const MESSAGE_TAG: &str = "TELEM";
pub const HEARTBEAT_SIGNAL: &str = "HB";

pub const REQUIRED_FIELDS: [&str; 13] = [
    "v", "sym", "tf", "t", "sq", "reg", "m", "sc", "d", "al", "atrx", "sig", "sec",
];

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("empty body")]
    EmptyBody,
    #[error("bad prefix, expected TELEM")]
    BadPrefix,
    #[error("missing fields: {}", .0.join(","))]
    MissingFields(Vec<&'static str>),
    #[error("invalid value for {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// Parsed message; the secret is split off so it never reaches storage.
#[derive(Debug, PartialEq)]
pub struct ParsedTelem {
    pub record: TelemetryRecord,
    pub secret: String,
}

pub fn parse_telem(raw: &str) -> Result<ParsedTelem, ParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ParseError::EmptyBody);
    }

    let mut tokens = raw.split('|');
    if tokens.next().map(str::trim) != Some(MESSAGE_TAG) {
        return Err(ParseError::BadPrefix);
    }

    // Later duplicates overwrite earlier ones. Values stay exactly as sent;
    // only numeric coercion ignores padding.
    let fields: HashMap<&str, &str> = tokens
        .filter_map(|chunk| chunk.split_once('='))
        .map(|(key, value)| (key.trim(), value))
        .collect();

    let missing: Vec<&'static str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|key| fields.get(key).map_or(true, |value| value.trim().is_empty()))
        .collect();
    if !missing.is_empty() {
        return Err(ParseError::MissingFields(missing));
    }

    let text = |key: &'static str| fields[key].to_string();

    let record = TelemetryRecord {
        version: number(&fields, "v")?,
        symbol: text("sym"),
        timeframe: text("tf"),
        timestamp: number(&fields, "t")?,
        sequence: text("sq"),
        regime: text("reg"),
        mode: number(&fields, "m")?,
        score: finite(&fields, "sc")?,
        distance: finite(&fields, "d")?,
        alert_level: alert_level(&fields)?,
        atr_multiple: finite(&fields, "atrx")?,
        signal: text("sig"),
    };

    Ok(ParsedTelem {
        record,
        secret: text("sec"),
    })
}

/// The body as it is persisted: unchanged apart from the `sec` value.
pub fn redact_secret(raw: &str) -> String {
    raw.split('|')
        .map(|chunk| match chunk.split_once('=') {
            Some((key, _)) if key.trim() == "sec" => "sec=***",
            _ => chunk,
        })
        .collect::<Vec<_>>()
        .join("|")
}

fn invalid(field: &'static str, value: &str) -> ParseError {
    ParseError::InvalidField {
        field,
        value: value.to_string(),
    }
}

fn number<T: FromStr>(fields: &HashMap<&str, &str>, field: &'static str) -> Result<T, ParseError> {
    let value = fields[field];
    value.trim().parse::<T>().map_err(|_| invalid(field, value))
}

fn finite(fields: &HashMap<&str, &str>, field: &'static str) -> Result<f64, ParseError> {
    let value: f64 = number(fields, field)?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid(field, fields[field]))
    }
}

// Pine's str.tostring renders whole numbers as "7.0" on some series.
fn alert_level(fields: &HashMap<&str, &str>) -> Result<i64, ParseError> {
    let value = fields["al"].trim();
    if let Ok(level) = value.parse::<i64>() {
        return Ok(level);
    }
    match value.parse::<f64>() {
        Ok(level) if level.is_finite() && level.fract() == 0.0 && level.abs() < 1e15 => {
            Ok(level as i64)
        }
        _ => Err(invalid("al", value)),
    }
}
