use super::error::AggregateError;
use super::facade::EventStore;
use super::metrics::{compute_metrics, MetricsResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A closed time interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, AggregateError> {
        if start > end {
            return Err(AggregateError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// The window of length `span` ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, span: Duration) -> Self {
        Self {
            start: end - span,
            end,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// The immediately preceding window of identical length.
    pub fn previous(&self) -> Self {
        Self {
            start: self.start - self.duration(),
            end: self.start,
        }
    }

    /// Whether `t` falls inside the window, both bounds inclusive.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Percentage change of each scalar metric against the previous period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricChanges {
    pub visitors: f64,
    pub sessions: f64,
    pub pageviews: f64,
    pub avg_session_duration: f64,
    pub bounce_rate: f64,
}

impl MetricChanges {
    #[allow(clippy::cast_precision_loss)]
    pub fn between(current: &MetricsResult, previous: &MetricsResult) -> Self {
        Self {
            visitors: change_pct(current.visitors as f64, previous.visitors as f64),
            sessions: change_pct(current.sessions as f64, previous.sessions as f64),
            pageviews: change_pct(current.pageviews as f64, previous.pageviews as f64),
            avg_session_duration: change_pct(
                current.avg_session_duration,
                previous.avg_session_duration,
            ),
            bounce_rate: change_pct(current.bounce_rate, previous.bounce_rate),
        }
    }
}

/// `(current - previous) / previous * 100`, or zero when `previous` is zero.
pub fn change_pct(current: f64, previous: f64) -> f64 {
    if previous.abs() < f64::EPSILON {
        return 0.0;
    }
    let change = (current - previous) / previous * 100.0;
    if change.is_finite() {
        change
    } else {
        0.0
    }
}

/// Attach period-over-period changes to `current`.
pub fn attach_changes(mut current: MetricsResult, previous: &MetricsResult) -> MetricsResult {
    current.changes = Some(MetricChanges::between(&current, previous));
    current
}

/// Aggregate `window` and its preceding window, returning the current
/// metrics with changes attached.
///
/// Both fetches run concurrently; if either fails the whole call fails.
pub async fn with_changes<S: EventStore>(
    store: &S,
    site_id: &str,
    window: TimeWindow,
    limit: usize,
) -> Result<MetricsResult, AggregateError> {
    let previous_window = window.previous();
    let (current_events, previous_events) = tokio::try_join!(
        store.fetch_events(site_id, window),
        store.fetch_events(site_id, previous_window),
    )
    .map_err(AggregateError::FetchFailed)?;

    let current = compute_metrics(&current_events, limit);
    let previous = compute_metrics(&previous_events, limit);
    Ok(attach_changes(current, &previous))
}
