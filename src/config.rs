//! Configuration loader for the `weatherflow` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Nothing else in the crate reads the environment;
//! values such as the provider credential are resolved here once and
//! injected where they are needed.
use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono_tz::Tz;

use crate::fetcher::{ApiKey, FetchOptions, Units, DEFAULT_BASE_URL};
use crate::locations::LocationSource;
use crate::pipeline::{RetryPolicy, RunSettings};
use crate::scheduler::Cadence;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Read an optional string variable, treating blank as unset.
fn optional_env(var_name: &str) -> Option<String> {
    env::var(var_name).ok().filter(|v| !v.trim().is_empty())
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Provider credential.
    pub api_key: ApiKey,

    /// One-call endpoint.
    pub api_url: String,

    pub fetch_options: FetchOptions,

    pub locations: LocationSource,

    /// Per-request timeout for provider calls.
    pub fetch_timeout: Duration,

    pub run_settings: RunSettings,

    pub schedules: Vec<Cadence>,

    /// Timezone cron expressions are evaluated in.
    pub schedule_tz: Tz,

    pub http_port: u16,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
/// - `OPENWEATHER_API_KEY` – provider credential
///
/// Optional:
/// - `OPENWEATHER_BASE_URL` – one-call endpoint (default: OpenWeather 3.0)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `WEATHER_UNITS` / `WEATHER_LANG` / `WEATHER_EXCLUDE` – request options
/// - `WEATHER_LOCATIONS` – `lat,lon;lat,lon` (default: built-in list)
/// - `FETCH_CONCURRENCY` – concurrent provider calls (default: 4)
/// - `FETCH_TIMEOUT_SECS` – per request (default: 10)
/// - `RUN_TIMEOUT_SECS` – run deadline (default: 60)
/// - `FETCH_MAX_ATTEMPTS` – attempts per location (default: 3)
/// - `FETCH_BACKOFF_MS` – base retry delay (default: 500)
/// - `WEATHER_SCHEDULES` – cadence list (default: `every-five-minutes`)
/// - `SCHEDULE_TIMEZONE` – cron timezone (default: `America/Chicago`)
/// - `HTTP_PORT` – listen port (default: 8080)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let api_key = ApiKey::new(require_env!("OPENWEATHER_API_KEY"));
    let api_url = optional_env("OPENWEATHER_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);

    let fetch_options = FetchOptions {
        exclude: match optional_env("WEATHER_EXCLUDE") {
            Some(v) => FetchOptions::parse_exclude(&v)?,
            None => None,
        },
        units: match optional_env("WEATHER_UNITS") {
            Some(v) => v.parse::<Units>()?,
            None => Units::Metric,
        },
        lang: optional_env("WEATHER_LANG").unwrap_or_else(|| "en".to_string()),
    };

    let locations = match optional_env("WEATHER_LOCATIONS") {
        Some(v) => LocationSource::parse(&v)?,
        None => LocationSource::builtin(),
    };

    let fetch_timeout = Duration::from_secs(u64::from(parse_env_u32!("FETCH_TIMEOUT_SECS", 10)));
    let run_timeout = Duration::from_secs(u64::from(parse_env_u32!("RUN_TIMEOUT_SECS", 60)));
    let max_concurrency = parse_env_u32!("FETCH_CONCURRENCY", 4);
    let max_attempts = parse_env_u32!("FETCH_MAX_ATTEMPTS", 3);
    let backoff_ms = parse_env_u32!("FETCH_BACKOFF_MS", 500);

    if max_concurrency == 0 {
        return Err(anyhow!("FETCH_CONCURRENCY must be at least 1"));
    }
    if max_attempts == 0 {
        return Err(anyhow!("FETCH_MAX_ATTEMPTS must be at least 1"));
    }

    let run_settings = RunSettings {
        max_concurrency: max_concurrency as usize,
        run_timeout,
        retry: RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(u64::from(backoff_ms)),
            max_delay: Duration::from_secs(30),
        },
    };

    let schedules = Cadence::parse_list(
        &optional_env("WEATHER_SCHEDULES").unwrap_or_else(|| "every-five-minutes".to_string()),
    )?;

    let tz_name = optional_env("SCHEDULE_TIMEZONE").unwrap_or_else(|| "America/Chicago".to_string());
    let schedule_tz = tz_name
        .trim()
        .parse::<Tz>()
        .map_err(|e| anyhow!("Invalid SCHEDULE_TIMEZONE '{}': {}", tz_name, e))?;

    let http_port = u16::try_from(parse_env_u32!("HTTP_PORT", 8080))
        .map_err(|e| anyhow!("Invalid HTTP_PORT: {}", e))?;

    Ok(Config {
        db_url,
        db_pool_max,
        api_key,
        api_url,
        fetch_options,
        locations,
        fetch_timeout,
        run_settings,
        schedules,
        schedule_tz,
        http_port,
    })
}

/// Replace the password in a connection URL with `****`.
pub fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            // The scheme colon is followed by "//", a password colon is not
            if !db_url[colon_pos + 1..].starts_with("//") {
                return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
            }
        }
    }
    db_url.to_string()
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the database password and the API key.
    pub fn log_config(&self) {
        // ---
        let schedules: Vec<&str> = self.schedules.iter().map(|c| c.as_str()).collect();

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL         : {}", mask_db_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX          : {}", self.db_pool_max);
        tracing::info!("  OPENWEATHER_API_KEY  : {}", self.api_key.masked());
        tracing::info!("  OPENWEATHER_BASE_URL : {}", self.api_url);
        tracing::info!("  WEATHER_UNITS        : {}", self.fetch_options.units.as_str());
        tracing::info!("  WEATHER_LANG         : {}", self.fetch_options.lang);
        tracing::info!("  WEATHER_EXCLUDE      : {:?}", self.fetch_options.exclude);
        tracing::info!("  WEATHER_LOCATIONS    : {} locations", self.locations.len());
        tracing::info!("  FETCH_CONCURRENCY    : {}", self.run_settings.max_concurrency);
        tracing::info!("  FETCH_TIMEOUT_SECS   : {}", self.fetch_timeout.as_secs());
        tracing::info!("  RUN_TIMEOUT_SECS     : {}", self.run_settings.run_timeout.as_secs());
        tracing::info!("  FETCH_MAX_ATTEMPTS   : {}", self.run_settings.retry.max_attempts);
        tracing::info!("  FETCH_BACKOFF_MS     : {}", self.run_settings.retry.base_delay.as_millis());
        tracing::info!("  WEATHER_SCHEDULES    : {}", schedules.join(","));
        tracing::info!("  SCHEDULE_TIMEZONE    : {}", self.schedule_tz);
        tracing::info!("  HTTP_PORT            : {}", self.http_port);
    }
}
