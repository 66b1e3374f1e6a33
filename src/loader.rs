//! Durable storage of normalized records.
//!
//! [`load`] is the only entry point the run coordinator uses. It enforces
//! the non-empty precondition and delegates the transactional write to a
//! [`RecordStore`]. [`PgStore`] keeps no session between calls: every
//! `insert_batch` acquires a pooled connection, writes inside one
//! transaction, and releases it.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::LoadError;
use crate::models::NormalizedRecord;
use crate::normalizer;

// ---

/// Rows per INSERT statement; keeps bind parameters under the Postgres limit.
pub const ROWS_PER_STATEMENT: usize = 1000;

/// Outcome of a [`load`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Empty batch, no transaction opened.
    Skipped,
    Committed { rows: usize },
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert all records in one transaction. Either every row becomes
    /// visible or none does.
    async fn insert_batch(&self, records: &[NormalizedRecord]) -> Result<(), LoadError>;

    /// Most recent rows, newest first.
    async fn recent(
        &self,
        limit: u32,
        weather_main: Option<&str>,
    ) -> Result<Vec<NormalizedRecord>, LoadError>;
}

/// Commit a batch of records.
pub async fn load(
    store: &dyn RecordStore,
    records: &[NormalizedRecord],
) -> Result<LoadOutcome, LoadError> {
    // ---
    if records.is_empty() {
        tracing::debug!("Empty batch, skipping load");
        return Ok(LoadOutcome::Skipped);
    }

    store.insert_batch(records).await?;
    tracing::info!("Committed {} weather records", records.len());

    Ok(LoadOutcome::Committed {
        rows: records.len(),
    })
}

// ---

/// PostgreSQL-backed store for the `weather_data` table.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn insert_batch(&self, records: &[NormalizedRecord]) -> Result<(), LoadError> {
        // ---
        let mut tx = self.pool.begin().await.map_err(LoadError::from_connect)?;

        for chunk in records.chunks(ROWS_PER_STATEMENT) {
            let mut query = insert_query(chunk);
            let written = query.build().execute(&mut *tx).await;
            if let Err(e) = written {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!("Rollback after failed insert also failed: {}", rb);
                }
                return Err(LoadError::from_write(e));
            }
        }

        tx.commit().await.map_err(|e| LoadError::CommitFailure {
            message: e.to_string(),
        })?;

        Ok(())
    }

    async fn recent(
        &self,
        limit: u32,
        weather_main: Option<&str>,
    ) -> Result<Vec<NormalizedRecord>, LoadError> {
        // ---
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("SELECT ");
        query.push(NormalizedRecord::COLUMNS.join(", "));
        query.push(" FROM weather_data");
        if let Some(main) = weather_main {
            query.push(" WHERE weather_main = ");
            query.push_bind(main.to_lowercase());
        }
        query.push(" ORDER BY id DESC LIMIT ");
        query.push_bind(i64::from(limit));

        let rows = query
            .build_query_as::<NormalizedRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(LoadError::from_connect)?;

        Ok(rows.into_iter().map(restore_local_time).collect())
    }
}

/// TIMESTAMPTZ keeps only the instant and decodes at `+00:00`. Shift it
/// back into the row's own zone.
fn restore_local_time(mut record: NormalizedRecord) -> NormalizedRecord {
    // ---
    if let Ok(local) = normalizer::local_time(record.local_time.timestamp(), &record.timezone) {
        record.local_time = local;
    }
    record
}

fn insert_query(records: &[NormalizedRecord]) -> QueryBuilder<'_, Postgres> {
    // ---
    let mut query: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "INSERT INTO weather_data ({}) ",
        NormalizedRecord::COLUMNS.join(", ")
    ));

    query.push_values(records, |mut row, r| {
        row.push_bind(r.lat)
            .push_bind(r.lon)
            .push_bind(r.local_time)
            .push_bind(&r.timezone)
            .push_bind(r.dt)
            .push_bind(r.temp)
            .push_bind(r.feels_like)
            .push_bind(r.pressure)
            .push_bind(r.humidity)
            .push_bind(r.dew_point)
            .push_bind(r.uvi)
            .push_bind(r.clouds)
            .push_bind(r.visibility)
            .push_bind(r.wind_speed)
            .push_bind(r.wind_deg)
            .push_bind(&r.weather_main)
            .push_bind(&r.weather_description);
    });

    query
}
