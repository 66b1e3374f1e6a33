//! Static set of monitoring points enumerated at the start of every run.

use std::collections::HashSet;

use anyhow::{anyhow, bail, Result};

use crate::models::Location;

// ---

/// Coordinates monitored when `WEATHER_LOCATIONS` is not set.
pub const DEFAULT_COORDINATES: [(f64, f64); 7] = [
    (33.0198, -96.6989),  // Plano, TX
    (40.7128, -74.0060),  // New York City, NY
    (34.0522, -118.2437), // Los Angeles, CA
    (39.7392, -104.9903), // Denver, CO
    (41.8781, -87.6298),  // Chicago, IL
    (35.6762, 139.6503),  // Tokyo, Japan
    (51.5074, -0.1278),   // London, UK
];

/// Validated, ordered, duplicate-free location list.
///
/// Construction is the only fallible step; enumeration hands out copies
/// and keeps no cursor, so each run starts from the full list.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSource {
    locations: Vec<Location>,
}

impl LocationSource {
    // ---
    pub fn new(coords: impl IntoIterator<Item = (f64, f64)>) -> Result<Self> {
        // ---
        let mut seen = HashSet::new();
        let mut locations = Vec::new();

        for (lat, lon) in coords {
            let location = Location::new(lat, lon).map_err(|e| anyhow!("Invalid location: {e}"))?;
            if !seen.insert(location) {
                bail!("Duplicate location {location} in configuration");
            }
            locations.push(location);
        }

        if locations.is_empty() {
            bail!("At least one location must be configured");
        }

        Ok(Self { locations })
    }

    /// The built-in monitoring set.
    pub fn builtin() -> Self {
        Self {
            locations: DEFAULT_COORDINATES
                .iter()
                .map(|&(lat, lon)| Location { lat, lon })
                .collect(),
        }
    }

    /// Parse `lat,lon;lat,lon;...` as used by `WEATHER_LOCATIONS`.
    pub fn parse(value: &str) -> Result<Self> {
        // ---
        let mut coords = Vec::new();
        for pair in value.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (lat, lon) = pair
                .split_once(',')
                .ok_or_else(|| anyhow!("Expected 'lat,lon' but got '{pair}'"))?;
            let lat: f64 = lat
                .trim()
                .parse()
                .map_err(|e| anyhow!("Invalid latitude in '{pair}': {e}"))?;
            let lon: f64 = lon
                .trim()
                .parse()
                .map_err(|e| anyhow!("Invalid longitude in '{pair}': {e}"))?;
            coords.push((lat, lon));
        }
        Self::new(coords)
    }

    /// Enumerate the configured locations in order.
    pub fn locations(&self) -> impl Iterator<Item = Location> + '_ {
        self.locations.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}
