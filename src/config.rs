use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub ml_endpoint: String,
    pub ml_timeout: Duration,
    pub idle_timeout: Duration,
    pub idle_warning: Duration,
}

impl Config {
    /// Reads settings from the process environment. Call `dotenvy::dotenv()`
    /// first if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                Error::Configuration(
                    "DATABASE_URL must be set to a production Postgres instance".to_string(),
                )
            })?;

        let max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 5u32)?;
        let ml_endpoint = lookup("ML_ENDPOINT")
            .unwrap_or_else(|| "http://localhost:8000".to_string())
            .trim_end_matches('/')
            .to_string();
        let ml_timeout_secs = parse_or(&lookup, "ML_TIMEOUT_SECS", 30u64)?;
        let idle_minutes = parse_or(&lookup, "IDLE_TIMEOUT_MINUTES", 15u64)?;
        let warning_secs = parse_or(&lookup, "IDLE_WARNING_SECONDS", 60u64)?;
        let idle_secs = idle_minutes.checked_mul(60).ok_or_else(|| {
            Error::Configuration(format!("IDLE_TIMEOUT_MINUTES {idle_minutes} is out of range"))
        })?;

        Ok(Self {
            database_url,
            max_connections,
            ml_endpoint,
            ml_timeout: Duration::from_secs(ml_timeout_secs),
            idle_timeout: Duration::from_secs(idle_secs),
            idle_warning: Duration::from_secs(warning_secs),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| Error::Configuration(format!("{key} must be a number, got {raw:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_database_url_is_set() {
        let config = Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://db")]))
            .expect("config");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.ml_endpoint, "http://localhost:8000");
        assert_eq!(config.idle_timeout, Duration::from_secs(15 * 60));
        assert_eq!(config.idle_warning, Duration::from_secs(60));
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn rejects_non_numeric_values() {
        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db"),
            ("IDLE_TIMEOUT_MINUTES", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("IDLE_TIMEOUT_MINUTES"));
    }

    #[test]
    fn rejects_idle_timeout_that_overflows_seconds() {
        let err = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db"),
            ("IDLE_TIMEOUT_MINUTES", "400000000000000000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("IDLE_TIMEOUT_MINUTES"));
    }

    #[test]
    fn accepts_large_warning_countdown() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db"),
            ("IDLE_WARNING_SECONDS", "18446744073709551615"),
        ]))
        .expect("config");
        assert_eq!(config.idle_warning, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn trims_trailing_slash_from_endpoint() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db"),
            ("ML_ENDPOINT", "https://ml.school.test/"),
        ]))
        .expect("config");
        assert_eq!(config.ml_endpoint, "https://ml.school.test");
    }
}
