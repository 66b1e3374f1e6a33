//! Test doubles shared by the unit tests: a scripted provider and an
//! in-memory store with all-or-nothing batches.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;

use crate::error::{FetchError, LoadError};
use crate::fetcher::{ApiKey, FetchOptions, WeatherProvider};
use crate::loader::RecordStore;
use crate::models::{
    CurrentConditions, Location, NormalizedRecord, RawObservation, WeatherCondition,
};

// ---

/// Payload shaped like a real one-call response for `location`.
pub fn sample_observation(location: Location) -> RawObservation {
    // ---
    RawObservation {
        lat: Some(location.lat),
        lon: Some(location.lon),
        timezone: Some("America/New_York".to_string()),
        current: Some(CurrentConditions {
            dt: Some(1625812800),
            temp: Some(298.77),
            feels_like: Some(298.77),
            pressure: Some(1016.0),
            humidity: Some(53.0),
            dew_point: Some(288.71),
            uvi: Some(0.89),
            clouds: Some(40.0),
            visibility: Some(10000.0),
            wind_speed: Some(4.12),
            wind_deg: Some(150.0),
            weather: Some(vec![WeatherCondition {
                main: Some("Clouds".to_string()),
                description: Some("few clouds".to_string()),
            }]),
        }),
    }
}

pub fn record_at(lat: f64, lon: f64) -> NormalizedRecord {
    // ---
    NormalizedRecord {
        lat,
        lon,
        local_time: DateTime::from_timestamp(0, 0).unwrap().fixed_offset(),
        timezone: "UTC".into(),
        dt: 0,
        temp: 20.0,
        feels_like: 20.0,
        pressure: 1000,
        humidity: 50,
        dew_point: 10.0,
        uvi: 0.0,
        clouds: 0,
        visibility: 10000,
        wind_speed: 1.0,
        wind_deg: 90,
        weather_main: "clear".into(),
        weather_description: "clear sky".into(),
    }
}

// ---

/// Provider whose answers are scripted per location. Unscripted locations
/// get [`sample_observation`]. A script is consumed one entry per call and
/// its last entry repeats.
#[derive(Debug, Default)]
pub struct MockProvider {
    scripts: Mutex<HashMap<Location, VecDeque<Result<RawObservation, FetchError>>>>,
    delays: HashMap<Location, Duration>,
    panics: HashSet<Location>,
    calls: Mutex<HashMap<Location, usize>>,
    total: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockProvider {
    // ---
    pub fn script(self, location: Location, answers: Vec<Result<RawObservation, FetchError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(location, answers.into_iter().collect());
        self
    }

    pub fn fail(self, location: Location, err: FetchError) -> Self {
        self.script(location, vec![Err(err)])
    }

    pub fn panic_on(mut self, location: Location) -> Self {
        self.panics.insert(location);
        self
    }

    pub fn delay(mut self, location: Location, delay: Duration) -> Self {
        self.delays.insert(location, delay);
        self
    }

    /// Uniform delay for every location in `locations`.
    pub fn delay_all(mut self, locations: impl IntoIterator<Item = Location>, delay: Duration) -> Self {
        for location in locations {
            self.delays.insert(location, delay);
        }
        self
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, location: Location) -> usize {
        self.calls.lock().unwrap().get(&location).copied().unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_answer(&self, location: Location) -> Result<RawObservation, FetchError> {
        // ---
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&location) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| Ok(sample_observation(location))),
            None => Ok(sample_observation(location)),
        }
    }
}

#[async_trait]
impl WeatherProvider for MockProvider {
    async fn fetch(
        &self,
        location: Location,
        _api_key: &ApiKey,
        _options: &FetchOptions,
    ) -> Result<RawObservation, FetchError> {
        // ---
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(location).or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.panics.contains(&location) {
            panic!("scripted panic for {location}");
        }

        if let Some(delay) = self.delays.get(&location) {
            tokio::time::sleep(*delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.next_answer(location)
    }
}

// ---

/// Store that stages a batch and only publishes it on commit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<NormalizedRecord>>,
    begins: AtomicUsize,
    fail_with: Option<LoadError>,
}

impl MemoryStore {
    // ---
    pub fn failing(err: LoadError) -> Self {
        Self {
            fail_with: Some(err),
            ..Default::default()
        }
    }

    pub fn begin_count(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn rows(&self) -> Vec<NormalizedRecord> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_batch(&self, records: &[NormalizedRecord]) -> Result<(), LoadError> {
        // ---
        self.begins.fetch_add(1, Ordering::SeqCst);
        let staged: Vec<NormalizedRecord> = records.to_vec();

        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }

        self.rows.lock().unwrap().extend(staged);
        Ok(())
    }

    async fn recent(
        &self,
        limit: u32,
        weather_main: Option<&str>,
    ) -> Result<Vec<NormalizedRecord>, LoadError> {
        // ---
        let wanted = weather_main.map(str::to_lowercase);
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|r| wanted.as_ref().map_or(true, |w| &r.weather_main == w))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
