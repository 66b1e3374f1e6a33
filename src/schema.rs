//! Database schema management for `weatherflow`.
//!
//! Ensures the `weather_data` table and its index exist before the first
//! run. Applied once on startup from `main.rs`; the loader only inserts.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create the database schema (idempotent).
///
/// Column order follows [`NormalizedRecord::COLUMNS`](crate::models::NormalizedRecord::COLUMNS)
/// after the surrogate `id`. Safe to call on every startup; no-op if objects
/// already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weather_data (
            id                  SERIAL PRIMARY KEY,
            lat                 DOUBLE PRECISION NOT NULL,
            lon                 DOUBLE PRECISION NOT NULL,
            local_time          TIMESTAMPTZ      NOT NULL,
            timezone            TEXT             NOT NULL,
            dt                  BIGINT           NOT NULL,
            temp                DOUBLE PRECISION NOT NULL,
            feels_like          DOUBLE PRECISION NOT NULL,
            pressure            INTEGER          NOT NULL,
            humidity            INTEGER          NOT NULL,
            dew_point           DOUBLE PRECISION NOT NULL,
            uvi                 DOUBLE PRECISION NOT NULL,
            clouds              INTEGER          NOT NULL,
            visibility          INTEGER          NOT NULL,
            wind_speed          DOUBLE PRECISION NOT NULL,
            wind_deg            INTEGER          NOT NULL,
            weather_main        TEXT             NOT NULL,
            weather_description TEXT             NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_weather_data_location_dt
            ON weather_data (lat, lon, dt);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
