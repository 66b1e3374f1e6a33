//! Scheduled weather observation pipeline.
//!
//! A run enumerates a static set of [`Location`]s, fetches the current
//! conditions for each one concurrently, normalizes every observation on
//! its own, and commits all resulting rows in a single transaction. One
//! location failing never stops the others; the [`RunResult`] says which
//! locations failed and at which stage.
//!
//! Module layout follows the pipeline:
//! - `locations` – the static work set
//! - `fetcher` – provider trait and the one-call HTTP client
//! - `normalizer` – payload projection, coercion and defaulting
//! - `loader` – transactional batch storage
//! - `pipeline` – fan-out / fan-in run coordinator
//! - `scheduler` – cron cadences that trigger runs
//! - `config`, `schema`, `routes` – process wiring

pub mod config;
pub mod error;
pub mod fetcher;
pub mod loader;
pub mod locations;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod routes;
pub mod scheduler;
pub mod schema;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{FetchError, LoadError, NormalizeError, Stage, StageError};
pub use fetcher::{ApiKey, FetchOptions, OneCallClient, Units, WeatherProvider};
pub use loader::{load, LoadOutcome, PgStore, RecordStore};
pub use locations::LocationSource;
pub use models::{Location, NormalizedRecord, PartialRecord, RawObservation};
pub use normalizer::{coerce_and_default, coerce_record, extract_current, RowResult};
pub use pipeline::{Pipeline, RetryPolicy, RunResult, RunSettings, RunStatus, RunSummary};
pub use scheduler::Cadence;
