//! Event aggregation engine.
//!
//! Turns a raw list of timestamped events into dashboard metrics:
//! events are grouped into sessions once, every calculator runs over the
//! same grouping, and the comparator optionally adds period-over-period
//! deltas. Storage is reached only through the [`facade::EventStore`] trait.

pub mod compare;
pub mod error;
pub mod event;
pub mod facade;
pub mod metrics;
pub mod sessions;
pub mod timeseries;

pub use compare::{MetricChanges, TimeWindow};
pub use error::{AggregateError, StoreError};
pub use event::{Event, EventType};
pub use facade::{AggregateOptions, Aggregator, EventStore};
pub use metrics::{MetricsResult, PageStats, ReferrerStats};

/// Convert a collection length into a metric count.
pub(crate) fn count(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}
