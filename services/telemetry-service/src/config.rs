use std::{env, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

pub const DEFAULT_DB_PATH: &str = "telem.db";
pub const MAX_ROLLUP_MINUTES: u32 = 7 * 24 * 60;
pub const MAX_BUCKET_MINUTES: u32 = 24 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("{key} out of range: {value}")]
    OutOfRange { key: &'static str, value: u64 },
}

/// Process-wide settings, read once at startup and never mutated.
#[derive(Clone, Debug)]
pub struct TelemConfig {
    pub url_token: String,
    pub secret: String,
    pub db_path: PathBuf,
    pub port: u16,
    pub max_body_bytes: usize,
    pub rollup_minutes: u32,
    pub rollup_bucket_minutes: u32,
    pub stale_after: Duration,
}

impl TelemConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let required = |key: &'static str| set(key).ok_or(ConfigError::Missing(key));

        let url_token = required("TELEM_URL_TOKEN")?;
        let secret = required("TELEM_SECRET")?;
        let db_path = set("TELEM_DB").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let rollup_minutes = in_range(
            "TELEM_ROLLUP_MINUTES",
            parsed(set("TELEM_ROLLUP_MINUTES"), "TELEM_ROLLUP_MINUTES", 60u32)?,
            1,
            MAX_ROLLUP_MINUTES,
        )?;
        let rollup_bucket_minutes = in_range(
            "TELEM_ROLLUP_BUCKET_MINUTES",
            parsed(set("TELEM_ROLLUP_BUCKET_MINUTES"), "TELEM_ROLLUP_BUCKET_MINUTES", 5u32)?,
            1,
            MAX_BUCKET_MINUTES,
        )?;
        let max_body_bytes = parsed(
            set("TELEM_MAX_BODY_BYTES"),
            "TELEM_MAX_BODY_BYTES",
            16 * 1024usize,
        )?;
        if max_body_bytes == 0 {
            return Err(ConfigError::OutOfRange {
                key: "TELEM_MAX_BODY_BYTES",
                value: 0,
            });
        }

        Ok(Self {
            url_token,
            secret,
            db_path: PathBuf::from(db_path),
            port: parsed(set("PORT"), "PORT", 8080u16)?,
            max_body_bytes,
            rollup_minutes,
            rollup_bucket_minutes,
            stale_after: Duration::from_secs(parsed(
                set("TELEM_STALE_AFTER_SECS"),
                "TELEM_STALE_AFTER_SECS",
                300u64,
            )?),
        })
    }
}

// Unset falls back to the default; set but unparsable is an error.
fn parsed<T: FromStr>(
    value: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn in_range(key: &'static str, value: u32, min: u32, max: u32) -> Result<u32, ConfigError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            key,
            value: u64::from(value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_optional_vars_missing() {
        let config = TelemConfig::from_lookup(lookup_from(&[
            ("TELEM_URL_TOKEN", "tok"),
            ("TELEM_SECRET", "S1"),
        ]))
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("telem.db"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.rollup_minutes, 60);
        assert_eq!(config.rollup_bucket_minutes, 5);
        assert_eq!(config.stale_after, Duration::from_secs(300));
    }

    #[test]
    fn token_and_secret_are_required() {
        let err = TelemConfig::from_lookup(lookup_from(&[("TELEM_SECRET", "S1")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("TELEM_URL_TOKEN"));

        let err = TelemConfig::from_lookup(lookup_from(&[
            ("TELEM_URL_TOKEN", "tok"),
            ("TELEM_SECRET", "  "),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("TELEM_SECRET"));
    }

    #[test]
    fn rejects_zero_rollup_window() {
        let err = TelemConfig::from_lookup(lookup_from(&[
            ("TELEM_URL_TOKEN", "tok"),
            ("TELEM_SECRET", "S1"),
            ("TELEM_ROLLUP_MINUTES", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
    }

    #[test]
    fn unparsable_values_are_rejected() {
        for key in ["PORT", "TELEM_ROLLUP_MINUTES", "TELEM_MAX_BODY_BYTES", "TELEM_STALE_AFTER_SECS"] {
            let err = TelemConfig::from_lookup(lookup_from(&[
                ("TELEM_URL_TOKEN", "tok"),
                ("TELEM_SECRET", "S1"),
                (key, "abc"),
            ]))
            .unwrap_err();
            assert_eq!(
                err,
                ConfigError::Invalid {
                    key,
                    value: "abc".to_string()
                }
            );
        }
    }

    #[test]
    fn rejects_zero_body_cap() {
        let err = TelemConfig::from_lookup(lookup_from(&[
            ("TELEM_URL_TOKEN", "tok"),
            ("TELEM_SECRET", "S1"),
            ("TELEM_MAX_BODY_BYTES", "0"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::OutOfRange {
                key: "TELEM_MAX_BODY_BYTES",
                value: 0
            }
        );
    }

    #[test]
    fn overrides_are_read() {
        let config = TelemConfig::from_lookup(lookup_from(&[
            ("TELEM_URL_TOKEN", "tok"),
            ("TELEM_SECRET", "S1"),
            ("TELEM_DB", "/var/lib/telem/f34.db"),
            ("PORT", "9000"),
            ("TELEM_STALE_AFTER_SECS", "90"),
        ]))
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/lib/telem/f34.db"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.stale_after, Duration::from_secs(90));
    }
}
