//! Run coordinator: fans one run out over all configured locations and
//! fans the normalized rows back in for a single commit.
//!
//! Every call to [`Pipeline::run`] builds its own task set, limiter and
//! batch, so consecutive or overlapping runs share nothing but the
//! injected provider, store and credential.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{FetchError, LoadError, NormalizeError, Stage, StageError};
use crate::fetcher::{ApiKey, FetchOptions, WeatherProvider};
use crate::loader::{self, RecordStore};
use crate::locations::LocationSource;
use crate::models::{Location, NormalizedRecord, RawObservation};
use crate::normalizer::{coerce_and_default, extract_current};

// ---

/// Bounded exponential backoff around a single location's fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    // ---
    /// Total attempts including the first one. 1 disables retries.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`: base, 2x base, 4x base, ... capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Knobs for one pipeline.
#[derive(Debug, Clone)]
pub struct RunSettings {
    // ---
    /// Upper bound on concurrent provider calls.
    pub max_concurrency: usize,
    /// Deadline for the whole fan-out.
    pub run_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            run_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

// ---

/// Lifecycle of a run. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Started,
    Fetching,
    Normalizing,
    Loading,
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl RunPhase {
    fn advance(&mut self, next: RunPhase) {
        debug_assert!(next > *self, "run phase moved from {self:?} back to {next:?}");
        tracing::debug!("Run phase {:?} -> {:?}", self, next);
        *self = next;
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl RunStatus {
    /// Partial runs count as failures for alerting purposes.
    pub fn is_failure(&self) -> bool {
        !matches!(self, RunStatus::Succeeded)
    }
}

impl From<RunStatus> for RunPhase {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Succeeded => RunPhase::Succeeded,
            RunStatus::PartiallyFailed => RunPhase::PartiallyFailed,
            RunStatus::Failed => RunPhase::Failed,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::PartiallyFailed => "partially_failed",
            RunStatus::Failed => "failed",
        })
    }
}

/// One location that did not make it into storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationFailure {
    pub location: Location,
    #[serde(flatten)]
    pub error: StageError,
}

impl LocationFailure {
    pub fn stage(&self) -> Stage {
        self.error.stage()
    }
}

/// Everything a caller learns about a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    // ---
    pub run_id: Uuid,
    pub trigger: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub location_count: usize,
    /// Records durably committed by this run.
    pub loaded: Vec<NormalizedRecord>,
    pub failures: Vec<LocationFailure>,
    pub load_error: Option<LoadError>,
}

/// [`RunResult`] without the row payload, for logs and the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub trigger: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub location_count: usize,
    pub loaded_count: usize,
    pub failures: Vec<LocationFailure>,
    pub load_error: Option<LoadError>,
}

impl RunResult {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            trigger: self.trigger.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            status: self.status,
            location_count: self.location_count,
            loaded_count: self.loaded.len(),
            failures: self.failures.clone(),
            load_error: self.load_error.clone(),
        }
    }
}

// ---

/// The fetch → normalize → load pipeline over a static location set.
#[derive(Clone)]
pub struct Pipeline {
    provider: Arc<dyn WeatherProvider>,
    store: Arc<dyn RecordStore>,
    api_key: ApiKey,
    options: Arc<FetchOptions>,
    locations: LocationSource,
    settings: RunSettings,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key)
            .field("options", &self.options)
            .field("locations", &self.locations.len())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Pipeline {
    // ---
    pub fn new(
        provider: Arc<dyn WeatherProvider>,
        store: Arc<dyn RecordStore>,
        api_key: ApiKey,
        options: FetchOptions,
        locations: LocationSource,
        settings: RunSettings,
    ) -> Self {
        Self {
            provider,
            store,
            api_key,
            options: Arc::new(options),
            locations,
            settings,
        }
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }

    /// Execute one run. Never fails as a whole; the outcome is in the
    /// returned [`RunResult`].
    pub async fn run(&self, trigger: &str) -> RunResult {
        // ---
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id, trigger);
        self.run_inner(run_id, trigger).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, trigger: &str) -> RunResult {
        // ---
        let started_at = Utc::now();
        let mut phase = RunPhase::Started;
        let location_count = self.locations.len();
        tracing::info!("Starting run over {} locations", location_count);

        // Fan-out
        phase.advance(RunPhase::Fetching);
        let limiter = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut fan_in = FanIn::with_capacity(location_count);

        for location in self.locations.locations() {
            let provider = Arc::clone(&self.provider);
            let options = Arc::clone(&self.options);
            let limiter = Arc::clone(&limiter);
            let api_key = self.api_key.clone();
            let retry = self.settings.retry;

            let span = tracing::info_span!("location", %location);
            let handle = tasks.spawn(
                async move {
                    let outcome =
                        process_location(&*provider, location, &api_key, &options, &limiter, retry)
                            .await;
                    (location, outcome)
                }
                .instrument(span),
            );
            fan_in.track(handle.id(), location);
        }

        // Barrier: nothing is loaded until every task has settled
        let deadline = Instant::now() + self.settings.run_timeout;
        let mut timed_out = false;

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                Ok(Some(joined)) => fan_in.settle(joined),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Run deadline of {:?} reached with {} locations outstanding",
                        self.settings.run_timeout,
                        fan_in.pending.len()
                    );
                    timed_out = true;
                    tasks.abort_all();
                    break;
                }
            }
        }

        // Drain aborted tasks; some may have finished before the abort landed
        while let Some(joined) = tasks.join_next_with_id().await {
            fan_in.settle(joined);
        }

        let FanIn {
            pending,
            batch,
            mut failures,
        } = fan_in;

        for location in pending.into_values() {
            let error = if timed_out {
                FetchError::Timeout
            } else {
                FetchError::Network {
                    message: "location task ended without a result".to_string(),
                }
            };
            failures.push(LocationFailure {
                location,
                error: error.into(),
            });
        }

        phase.advance(RunPhase::Normalizing);
        tracing::info!(
            "{} of {} locations normalized, {} failed",
            batch.len(),
            location_count,
            failures.len()
        );

        // Fan-in
        let mut load_error = None;
        let (keys, mut records): (Vec<Location>, Vec<NormalizedRecord>) = batch.into_iter().unzip();
        let status = if records.is_empty() {
            tracing::warn!("No records to load");
            RunStatus::Failed
        } else {
            phase.advance(RunPhase::Loading);
            match loader::load(&*self.store, &records).await {
                Ok(_) if failures.is_empty() => RunStatus::Succeeded,
                Ok(_) => RunStatus::PartiallyFailed,
                Err(e) => {
                    tracing::error!("Load failed, {} records rolled back: {}", records.len(), e);
                    records.clear();
                    failures.extend(keys.iter().map(|&location| LocationFailure {
                        location,
                        error: e.clone().into(),
                    }));
                    load_error = Some(e);
                    RunStatus::Failed
                }
            }
        };
        phase.advance(status.into());

        let result = RunResult {
            run_id,
            trigger: trigger.to_string(),
            started_at,
            finished_at: Utc::now(),
            status,
            location_count,
            loaded: records,
            failures,
            load_error,
        };

        tracing::info!(
            "Run finished: status={} loaded={} failed={}",
            result.status,
            result.loaded.len(),
            result.failures.len()
        );
        result
    }
}

type TaskOutput = (Location, Result<NormalizedRecord, StageError>);

/// Fan-in bookkeeping for one run. Every row and failure is keyed by the
/// configured [`Location`], never by coordinates echoed in the payload.
struct FanIn {
    pending: HashMap<task::Id, Location>,
    batch: Vec<(Location, NormalizedRecord)>,
    failures: Vec<LocationFailure>,
}

impl FanIn {
    fn with_capacity(n: usize) -> Self {
        Self {
            pending: HashMap::with_capacity(n),
            batch: Vec::with_capacity(n),
            failures: Vec::new(),
        }
    }

    fn track(&mut self, id: task::Id, location: Location) {
        self.pending.insert(id, location);
    }

    fn settle(&mut self, joined: Result<(task::Id, TaskOutput), task::JoinError>) {
        // ---
        match joined {
            Ok((id, (location, outcome))) => {
                self.pending.remove(&id);
                match outcome {
                    Ok(record) => self.batch.push((location, record)),
                    Err(error) => {
                        tracing::warn!("{} failed at {}: {}", location, error.stage(), error);
                        self.failures.push(LocationFailure { location, error });
                    }
                }
            }
            // Aborted at the deadline; stays pending and becomes a timeout
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                let Some(location) = self.pending.remove(&e.id()) else {
                    tracing::error!("Untracked task panicked: {}", e);
                    return;
                };
                tracing::error!("{} task panicked: {}", location, e);
                self.failures.push(LocationFailure {
                    location,
                    error: FetchError::Network {
                        message: "location task panicked".to_string(),
                    }
                    .into(),
                });
            }
        }
    }
}

/// Fetch and normalize a single location.
async fn process_location(
    provider: &dyn WeatherProvider,
    location: Location,
    api_key: &ApiKey,
    options: &FetchOptions,
    limiter: &Semaphore,
    retry: RetryPolicy,
) -> Result<NormalizedRecord, StageError> {
    // ---
    let raw = fetch_with_retry(provider, location, api_key, options, limiter, retry).await?;

    let mut partial = extract_current(&raw);
    partial.lat.get_or_insert(location.lat);
    partial.lon.get_or_insert(location.lon);

    let record = coerce_and_default(std::slice::from_ref(&partial))?
        .pop()
        .ok_or_else(|| NormalizeError::MalformedBatch {
            reason: "coercion returned no row".to_string(),
        })??;

    tracing::debug!("Normalized observation at {}", record.local_time);
    Ok(record)
}

/// Call the provider, retrying transient failures per `retry`. A limiter
/// permit is held only for the duration of each request.
pub async fn fetch_with_retry(
    provider: &dyn WeatherProvider,
    location: Location,
    api_key: &ApiKey,
    options: &FetchOptions,
    limiter: &Semaphore,
    retry: RetryPolicy,
) -> Result<RawObservation, FetchError> {
    // ---
    let mut attempt = 1;
    loop {
        let result = {
            let _permit = limiter.acquire().await.map_err(|_| FetchError::Network {
                message: "fetch limiter closed".to_string(),
            })?;
            provider.fetch(location, api_key, options).await
        };

        match result {
            Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                let delay = retry.delay_for(attempt);
                tracing::warn!(
                    "Attempt {}/{} failed ({}), retrying in {:?}",
                    attempt,
                    retry.max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
