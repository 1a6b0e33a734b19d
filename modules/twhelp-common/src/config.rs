use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Database
    pub database_url: String,
    pub max_db_connections: u32,

    // Queue lanes
    pub worker_limit: usize,
    pub ennoblement_worker_limit: usize,
    pub reservation_timeout: Duration,
    pub retry_limit: u32,

    // Jobs
    pub history_retention_days: i64,
    pub run_on_init: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let worker_limit = parse_env("WORKER_LIMIT", 1)?;
        let config = Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            max_db_connections: parse_env("MAX_DB_CONNECTIONS", 10)?,
            worker_limit,
            ennoblement_worker_limit: parse_env("ENNOBLEMENT_WORKER_LIMIT", worker_limit)?,
            reservation_timeout: Duration::from_secs(parse_env("RESERVATION_TIMEOUT_SECS", 120)?),
            retry_limit: parse_env("RETRY_LIMIT", 3)?,
            history_retention_days: parse_env("HISTORY_RETENTION_DAYS", 180)?,
            run_on_init: parse_env("RUN_ON_INIT", false)?,
        };

        config.log_values();
        Ok(config)
    }

    fn log_values(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", redact_url(&self.database_url));
        tracing::info!(
            worker_limit = self.worker_limit,
            ennoblement_worker_limit = self.ennoblement_worker_limit,
            reservation_timeout_secs = self.reservation_timeout.as_secs(),
            retry_limit = self.retry_limit,
            "  Queue lanes"
        );
        tracing::info!(
            history_retention_days = self.history_retention_days,
            run_on_init = self.run_on_init,
            "  Jobs"
        );
    }
}

/// Scheme only; credentials and host stay out of the logs.
fn redact_url(val: &str) -> String {
    let chars = val.chars().count();
    match val.split_once("://") {
        Some((scheme, _)) => format!("{scheme}://...({chars} chars)"),
        None => format!("...({chars} chars)"),
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        _ => Ok(default),
    }
}
