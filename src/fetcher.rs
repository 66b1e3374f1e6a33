//! Weather provider access.
//!
//! [`WeatherProvider`] is the seam the run coordinator fans out over;
//! [`OneCallClient`] is the production implementation talking to the
//! OpenWeather one-call endpoint. One call to [`WeatherProvider::fetch`] is
//! exactly one outbound request; retries belong to the caller.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::error::FetchError;
use crate::models::{Location, RawObservation};

// ---

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/3.0/onecall";

/// Provider credential. Resolved once at startup and passed to every call.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// First four characters followed by a mask, for logs.
    pub fn masked(&self) -> String {
        let visible: String = self.0.chars().take(4).collect();
        format!("{visible}****")
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({})", self.masked())
    }
}

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Units {
    #[default]
    Metric,
    Imperial,
    Standard,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
            Units::Standard => "standard",
        }
    }
}

impl FromStr for Units {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "metric" => Ok(Units::Metric),
            "imperial" => Ok(Units::Imperial),
            "standard" => Ok(Units::Standard),
            _ => Err(anyhow!(
                "Unknown units '{value}'. Supported: metric, imperial, standard."
            )),
        }
    }
}

/// Sections of the one-call response that can be excluded.
pub const EXCLUDABLE_PARTS: [&str; 5] = ["current", "minutely", "hourly", "daily", "alerts"];

/// Per-request query options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    // ---
    pub exclude: Option<Vec<String>>,
    pub units: Units,
    /// ISO language code.
    pub lang: String,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            exclude: None,
            units: Units::Metric,
            lang: "en".to_string(),
        }
    }
}

impl FetchOptions {
    /// Parse a comma separated exclusion list, rejecting unknown parts.
    pub fn parse_exclude(value: &str) -> Result<Option<Vec<String>>> {
        // ---
        let parts: Vec<String> = value
            .split(',')
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        if let Some(bad) = parts.iter().find(|p| !EXCLUDABLE_PARTS.contains(&p.as_str())) {
            return Err(anyhow!(
                "Unknown exclude part '{bad}'. Supported: {}",
                EXCLUDABLE_PARTS.join(", ")
            ));
        }

        Ok(if parts.is_empty() { None } else { Some(parts) })
    }

    /// Query parameters for one request, `exclude` only when set.
    pub fn query(&self, location: Location, api_key: &ApiKey) -> Vec<(&'static str, String)> {
        // ---
        let mut params = vec![
            ("lat", location.lat.to_string()),
            ("lon", location.lon.to_string()),
            ("appid", api_key.expose().to_string()),
            ("units", self.units.as_str().to_string()),
            ("lang", self.lang.clone()),
        ];
        if let Some(exclude) = &self.exclude {
            params.push(("exclude", exclude.join(",")));
        }
        params
    }
}

// ---

#[async_trait]
pub trait WeatherProvider: Send + Sync + fmt::Debug {
    /// Fetch the current observation for one location.
    async fn fetch(
        &self,
        location: Location,
        api_key: &ApiKey,
        options: &FetchOptions,
    ) -> Result<RawObservation, FetchError>;
}

/// HTTP client for the one-call endpoint.
#[derive(Debug, Clone)]
pub struct OneCallClient {
    http: Client,
    base_url: String,
}

impl OneCallClient {
    // ---
    /// Build a client whose requests time out after `request_timeout`.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        // ---
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {e}"))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl WeatherProvider for OneCallClient {
    async fn fetch(
        &self,
        location: Location,
        api_key: &ApiKey,
        options: &FetchOptions,
    ) -> Result<RawObservation, FetchError> {
        // ---
        tracing::debug!("Fetching weather for {}", location);

        let res = self
            .http
            .get(&self.base_url)
            .query(&options.query(location, api_key))
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            tracing::warn!(
                "Provider returned {} for {}: {}",
                status,
                location,
                truncate_body(&body)
            );
            return Err(FetchError::from_status(status.as_u16(), truncate_body(&body)));
        }

        let observation = parse_body(&body)?;
        tracing::debug!("Weather fetched for {}", location);
        Ok(observation)
    }
}

/// Decode a 2xx body. `null`, empty or non-object bodies carry no data
/// and count as a failed fetch.
pub fn parse_body(body: &str) -> Result<RawObservation, FetchError> {
    // ---
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| FetchError::InvalidPayload {
            message: format!("{e}: {}", truncate_body(body)),
        })?;

    if !value.is_object() {
        return Err(FetchError::InvalidPayload {
            message: format!("expected a JSON object, got {}", truncate_body(body)),
        });
    }

    serde_json::from_value(value).map_err(|e| FetchError::InvalidPayload {
        message: e.to_string(),
    })
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
