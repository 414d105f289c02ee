//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs on the in-memory store
/// - `WORKER_CONCURRENCY`: scheduled tasks run at once (default: `16`)
/// - `OUTBOX_SCHEDULE`: cron expression for outbox delivery (default: every 5 seconds)
/// - `RECONCILE_SCHEDULE`: cron expression for reconciliation (default: every minute)
/// - `PROCESSOR_TIMEOUT_SECS`: processor call timeout (default: `30`)
/// - `STUCK_PROCESSING_TIMEOUT_SECS`: age at which Processing counts as stuck (default: `600`),
///   raised to at least `PROCESSOR_TIMEOUT_SECS` plus one minute
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub worker_concurrency: usize,
    pub outbox_schedule: String,
    pub reconcile_schedule: String,
    pub processor_timeout: Duration,
    pub stuck_processing_timeout: Duration,
}

/// Minimum gap between the processor timeout and the stuck-processing
/// timeout, so the reconciler never fails an attempt whose call can still
/// return.
const STUCK_PROCESSING_MARGIN: Duration = Duration::from_secs(60);

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let processor_timeout = parse_var(&lookup, "PROCESSOR_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.processor_timeout);
        let stuck_processing_timeout = parse_var(&lookup, "STUCK_PROCESSING_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.stuck_processing_timeout)
            .max(processor_timeout + STUCK_PROCESSING_MARGIN);

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            worker_concurrency: parse_var(&lookup, "WORKER_CONCURRENCY")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.worker_concurrency),
            outbox_schedule: lookup("OUTBOX_SCHEDULE").unwrap_or(defaults.outbox_schedule),
            reconcile_schedule: lookup("RECONCILE_SCHEDULE")
                .unwrap_or(defaults.reconcile_schedule),
            processor_timeout,
            stuck_processing_timeout,
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            worker_concurrency: 16,
            outbox_schedule: "*/5 * * * * *".to_string(),
            reconcile_schedule: "0 * * * * *".to_string(),
            processor_timeout: Duration::from_secs(30),
            stuck_processing_timeout: Duration::from_secs(600),
        }
    }
}
