use chrono::{DateTime, Utc};

/// Failure reported by an [`EventStore`](super::EventStore) implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),
    #[error("store task failed: {0}")]
    Task(String),
}

/// Failure of an aggregation call.
///
/// An empty result set is never an error; aggregation over no events yields
/// a zero-valued result.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("fetch failed: {0}")]
    FetchFailed(#[source] StoreError),
    #[error("invalid window: start {start} is after end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl From<StoreError> for AggregateError {
    fn from(e: StoreError) -> Self {
        Self::FetchFailed(e)
    }
}
