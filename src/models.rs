//! Data models for the weather pipeline.
//!
//! Data moves through three shapes: the provider payload
//! ([`RawObservation`]), the flat optional projection ([`PartialRecord`]), and the
//! fully typed row ([`NormalizedRecord`]) that gets persisted.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

// ---

/// A monitoring point, also the fan-out key of a run.
///
/// Equality and hashing use the exact bit pattern of both coordinates,
/// so two distinct coordinate pairs can never collide on the key.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Location {
    // ---
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    // ---
    /// Build a validated location. Both values must be finite and inside
    /// the usual latitude / longitude ranges.
    pub fn new(lat: f64, lon: f64) -> Result<Self, String> {
        // ---
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(format!("latitude {lat} outside [-90, 90]"));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(format!("longitude {lon} outside [-180, 180]"));
        }
        // -0.0 and 0.0 are the same point
        Ok(Self {
            lat: lat + 0.0,
            lon: lon + 0.0,
        })
    }

    fn key(&self) -> (u64, u64) {
        (self.lat.to_bits(), self.lon.to_bits())
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Location {}

impl Hash for Location {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

// ---

/// One-call provider response. Every field may be absent or null, and
/// sections this pipeline does not use (`hourly`, `daily`, ...) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawObservation {
    // ---
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub timezone: Option<String>,
    pub current: Option<CurrentConditions>,
}

/// The `current` block of a provider response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CurrentConditions {
    // ---
    pub dt: Option<i64>,
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
    pub dew_point: Option<f64>,
    pub uvi: Option<f64>,
    pub clouds: Option<f64>,
    pub visibility: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_deg: Option<f64>,
    pub weather: Option<Vec<WeatherCondition>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WeatherCondition {
    // ---
    pub main: Option<String>,
    pub description: Option<String>,
}

// ---

/// Current conditions flattened out of a [`RawObservation`], still optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialRecord {
    // ---
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub timezone: Option<String>,
    pub dt: Option<i64>,
    pub temp: Option<f64>,
    pub feels_like: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
    pub dew_point: Option<f64>,
    pub uvi: Option<f64>,
    pub clouds: Option<f64>,
    pub visibility: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_deg: Option<f64>,
    pub weather_main: Option<String>,
    pub weather_description: Option<String>,
}

// ---

/// Persistence-ready weather row. No field is optional.
///
/// Field declaration order is the presentation order: `local_time` sits
/// right after `lon`, which the JSON export and the insert column list
/// both rely on.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct NormalizedRecord {
    // ---
    pub lat: f64,
    pub lon: f64,
    pub local_time: DateTime<FixedOffset>,
    pub timezone: String,
    pub dt: i64,
    pub temp: f64,
    pub feels_like: f64,
    pub pressure: i32,
    pub humidity: i32,
    pub dew_point: f64,
    pub uvi: f64,
    pub clouds: i32,
    pub visibility: i32,
    pub wind_speed: f64,
    pub wind_deg: i32,
    pub weather_main: String,
    pub weather_description: String,
}

impl NormalizedRecord {
    /// Column names in presentation order, matching the `weather_data` table.
    pub const COLUMNS: [&'static str; 17] = [
        "lat",
        "lon",
        "local_time",
        "timezone",
        "dt",
        "temp",
        "feels_like",
        "pressure",
        "humidity",
        "dew_point",
        "uvi",
        "clouds",
        "visibility",
        "wind_speed",
        "wind_deg",
        "weather_main",
        "weather_description",
    ];

    pub fn location(&self) -> Location {
        Location {
            lat: self.lat,
            lon: self.lon,
        }
    }
}
