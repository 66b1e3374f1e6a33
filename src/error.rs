//! Error taxonomy for the three pipeline stages.
//!
//! All three enums are `Clone` so a run can carry them in its
//! [`RunResult`](crate::pipeline::RunResult) after the originating task is gone.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

// ---

/// Failure of a single provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchError {
    #[error("network error: {message}")]
    Network { message: String },

    #[error("provider rejected request with status {status}: {body}")]
    ClientError { status: u16, body: String },

    #[error("provider failed with status {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("provider returned an unusable payload: {message}")]
    InvalidPayload { message: String },
}

impl FetchError {
    /// Whether a retry has a chance of succeeding. Client errors and bad
    /// payloads are deterministic, everything else may be transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network { .. } | FetchError::ServerError { .. } | FetchError::Timeout
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network { .. } => "network",
            FetchError::ClientError { .. } => "client_error",
            FetchError::ServerError { .. } => "server_error",
            FetchError::Timeout => "timeout",
            FetchError::InvalidPayload { .. } => "invalid_payload",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        // ---
        if err.is_timeout() {
            return FetchError::Timeout;
        }
        if err.is_decode() {
            return FetchError::InvalidPayload {
                message: err.to_string(),
            };
        }
        if let Some(status) = err.status() {
            return FetchError::from_status(status.as_u16(), String::new());
        }
        FetchError::Network {
            message: err.to_string(),
        }
    }
}

impl FetchError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400..=499 => FetchError::ClientError { status, body },
            500..=599 => FetchError::ServerError { status, body },
            _ => FetchError::Network {
                message: format!("unexpected status {status}: {body}"),
            },
        }
    }
}

// ---

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizeError {
    /// The batch handed to coercion has no rows.
    #[error("malformed batch: {reason}")]
    MalformedBatch { reason: String },

    #[error("timestamp {dt} cannot be represented")]
    InvalidTimestamp { dt: i64 },
}

impl NormalizeError {
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizeError::MalformedBatch { .. } => "malformed_batch",
            NormalizeError::InvalidTimestamp { .. } => "invalid_timestamp",
        }
    }
}

// ---

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadError {
    #[error("could not reach the store: {message}")]
    ConnectionFailure { message: String },

    #[error("constraint violated: {message}")]
    ConstraintViolation { message: String },

    #[error("commit failed: {message}")]
    CommitFailure { message: String },
}

impl LoadError {
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::ConnectionFailure { .. } => "connection_failure",
            LoadError::ConstraintViolation { .. } => "constraint_violation",
            LoadError::CommitFailure { .. } => "commit_failure",
        }
    }

    /// Map a driver error raised while writing rows.
    pub fn from_write(err: sqlx::Error) -> Self {
        // ---
        match err {
            sqlx::Error::Database(db) => {
                use sqlx::error::ErrorKind;
                match db.kind() {
                    ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation => LoadError::ConstraintViolation {
                        message: db.to_string(),
                    },
                    _ => LoadError::CommitFailure {
                        message: db.to_string(),
                    },
                }
            }
            other => LoadError::from_connect(other),
        }
    }

    /// Map a driver error raised while acquiring a connection or beginning
    /// the transaction.
    pub fn from_connect(err: sqlx::Error) -> Self {
        // ---
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => LoadError::ConnectionFailure {
                message: err.to_string(),
            },
            other => LoadError::CommitFailure {
                message: other.to_string(),
            },
        }
    }
}

// ---

/// Pipeline stage a location failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Normalize,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Fetch => "fetch",
            Stage::Normalize => "normalize",
            Stage::Load => "load",
        })
    }
}

/// A stage error tagged with the stage it came from.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "stage", content = "error", rename_all = "snake_case")]
pub enum StageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Fetch(_) => Stage::Fetch,
            StageError::Normalize(_) => Stage::Normalize,
            StageError::Load(_) => Stage::Load,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Fetch(e) => e.kind(),
            StageError::Normalize(e) => e.kind(),
            StageError::Load(e) => e.kind(),
        }
    }
}
