//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use ledger::RetryPolicy;
use thiserror::Error;

/// A variable was set to something that does not parse.
#[derive(Debug, Error)]
#[error("Invalid value for {var}: {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL URL; unset means the in-memory store
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `RESERVATION_TTL_SECS`: how long pending orders hold stock (default: `900`)
/// - `SWEEP_INTERVAL_SECS`: expiry sweep period (default: `30`)
/// - `RETRY_MAX_ATTEMPTS`: stale-version attempts per mutation (default: `5`)
/// - `RETRY_BASE_DELAY_MS` / `RETRY_MAX_DELAY_MS`: backoff (default: `10` / `500`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub reservation_ttl: Duration,
    pub sweep_interval: Duration,
    pub retry: RetryPolicy,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which returns a variable's value
    /// if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse(&var, "PORT", defaults.port)?,
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse(&var, "LOG_FORMAT", defaults.log_format)?,
            database_url: var("DATABASE_URL"),
            database_max_connections: parse(
                &var,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            reservation_ttl: parse_secs(&var, "RESERVATION_TTL_SECS", defaults.reservation_ttl)?,
            sweep_interval: parse_secs(&var, "SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            retry: RetryPolicy::new(
                parse(&var, "RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                Duration::from_millis(parse(
                    &var,
                    "RETRY_BASE_DELAY_MS",
                    millis(defaults.retry.base_delay),
                )?),
                Duration::from_millis(parse(
                    &var,
                    "RETRY_MAX_DELAY_MS",
                    millis(defaults.retry.max_delay),
                )?),
            ),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            reservation_ttl: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

fn parse<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError { var: name, value }),
    }
}

/// Parses a whole number of seconds. Zero is rejected.
fn parse_secs(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match parse(var, name, default.as_secs())? {
        0 => Err(ConfigError {
            var: name,
            value: "0".to_string(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
