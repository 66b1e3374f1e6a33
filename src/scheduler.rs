//! Time-based triggers for the pipeline.
//!
//! Each enabled [`Cadence`] gets its own loop that sleeps until the next
//! cron occurrence (evaluated in the configured execution timezone), runs
//! the pipeline, and publishes the summary. Cadences are independent:
//! a slow run on one never delays another.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;

use crate::pipeline::{Pipeline, RunStatus, RunSummary};

// ---

/// Most recent run summary, shared with the HTTP surface.
pub type LatestRun = Arc<RwLock<Option<RunSummary>>>;

/// Supported trigger cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cadence {
    EveryMinute,
    EveryFiveMinutes,
    EveryHour,
}

impl Cadence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::EveryMinute => "every-minute",
            Cadence::EveryFiveMinutes => "every-five-minutes",
            Cadence::EveryHour => "every-hour",
        }
    }

    /// Standard 5-field cron expression.
    pub fn cron_expr(&self) -> &'static str {
        match self {
            Cadence::EveryMinute => "* * * * *",
            Cadence::EveryFiveMinutes => "*/5 * * * *",
            Cadence::EveryHour => "0 * * * *",
        }
    }

    pub const fn all() -> &'static [Cadence] {
        &[
            Cadence::EveryMinute,
            Cadence::EveryFiveMinutes,
            Cadence::EveryHour,
        ]
    }

    /// Parse a comma separated cadence list, dropping duplicates.
    pub fn parse_list(value: &str) -> Result<Vec<Cadence>> {
        // ---
        let mut cadences = Vec::new();
        for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let cadence: Cadence = name.parse()?;
            if !cadences.contains(&cadence) {
                cadences.push(cadence);
            }
        }
        Ok(cadences)
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cadence {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        Cadence::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == value.trim().to_lowercase())
            .ok_or_else(|| {
                anyhow!(
                    "Unknown schedule '{value}'. Supported: every-minute, every-five-minutes, every-hour."
                )
            })
    }
}

/// Next occurrence of `cadence` strictly after `after`, evaluated in `tz`.
///
/// The `cron` crate expects 6 fields (sec min hr dom month dow), so the
/// 5-field expression gets a leading "0 " to pin seconds to zero.
pub fn next_fire_after(cadence: Cadence, tz: Tz, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    // ---
    let expr = format!("0 {}", cadence.cron_expr());
    let schedule = cron::Schedule::from_str(&expr)
        .map_err(|e| anyhow!("Invalid cron expression '{}': {}", expr, e))?;

    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|next| next.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("No next occurrence for {}", cadence))
}

/// Run every cadence until `shutdown` flips to `true`.
pub async fn run_schedules(
    pipeline: Pipeline,
    cadences: Vec<Cadence>,
    tz: Tz,
    latest: LatestRun,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    // ---
    if cadences.is_empty() {
        tracing::warn!("No schedules enabled, pipeline only runs on demand");
        return Ok(());
    }

    let mut loops = JoinSet::new();
    for cadence in cadences {
        tracing::info!(
            "Schedule {} enabled ({} in {})",
            cadence,
            cadence.cron_expr(),
            tz
        );
        loops.spawn(schedule_loop(
            pipeline.clone(),
            cadence,
            tz,
            Arc::clone(&latest),
            shutdown.clone(),
        ));
    }

    while let Some(joined) = loops.join_next().await {
        joined.map_err(|e| anyhow!("Schedule loop crashed: {e}"))??;
    }

    tracing::info!("All schedules stopped");
    Ok(())
}

async fn schedule_loop(
    pipeline: Pipeline,
    cadence: Cadence,
    tz: Tz,
    latest: LatestRun,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    // ---
    loop {
        let next = next_fire_after(cadence, tz, Utc::now())?;
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tracing::debug!("Schedule {} next fires at {}", cadence, next.with_timezone(&tz));

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Schedule {} stopping", cadence);
                    return Ok(());
                }
                continue;
            }
        }

        let result = pipeline.run(cadence.as_str()).await;
        report(&result.summary());
        *latest.write().await = Some(result.summary());
    }
}

/// Log a finished run at a level matching its status.
pub fn report(summary: &RunSummary) {
    // ---
    match summary.status {
        RunStatus::Succeeded => tracing::info!(
            "Run {} ({}) succeeded: {} records loaded",
            summary.run_id,
            summary.trigger,
            summary.loaded_count
        ),
        RunStatus::PartiallyFailed | RunStatus::Failed => {
            for failure in &summary.failures {
                tracing::error!(
                    "Run {} location {} failed at {}: {}",
                    summary.run_id,
                    failure.location,
                    failure.stage(),
                    failure.error
                );
            }
            tracing::error!(
                "Run {} ({}) {}: {} loaded, {} failed",
                summary.run_id,
                summary.trigger,
                summary.status,
                summary.loaded_count,
                summary.failures.len()
            );
        }
    }
}
