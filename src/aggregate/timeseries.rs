use super::compare::TimeWindow;
use super::count;
use super::event::Event;
use chrono::{DateTime, Duration, DurationRound, Utc};
use std::collections::{BTreeMap, HashSet};

/// A single time bucket with visitor and pageview counts.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimeBucket {
    pub bucket: String,
    pub visitors: u64,
    pub pageviews: u64,
}

/// Time granularity for bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    /// Hourly buckets for windows up to two days, daily beyond that.
    pub fn for_window(window: &TimeWindow) -> Self {
        if window.duration() <= Duration::hours(48) {
            Self::Hour
        } else {
            Self::Day
        }
    }

    fn step(self) -> Duration {
        match self {
            Self::Hour => Duration::hours(1),
            Self::Day => Duration::days(1),
        }
    }

    const fn format_str(self) -> &'static str {
        match self {
            Self::Hour => "%Y-%m-%d %H:00",
            Self::Day => "%Y-%m-%d",
        }
    }

    fn truncate(self, t: DateTime<Utc>) -> DateTime<Utc> {
        t.duration_trunc(self.step()).unwrap_or(t)
    }
}

#[derive(Default)]
struct BucketAccumulator<'a> {
    visitors: HashSet<&'a str>,
    pageviews: u64,
}

/// Bucket events inside `window` by time.
///
/// Every bucket overlapping the window is present, empty ones with zero
/// counts, in ascending order.
pub fn visitor_timeseries(
    events: &[Event],
    window: &TimeWindow,
    granularity: Granularity,
) -> Vec<TimeBucket> {
    let mut buckets: BTreeMap<DateTime<Utc>, BucketAccumulator<'_>> = BTreeMap::new();

    let mut cursor = granularity.truncate(window.start);
    while cursor <= window.end {
        buckets.entry(cursor).or_default();
        cursor += granularity.step();
    }

    for event in events.iter().filter(|e| window.contains(e.created_at)) {
        let acc = buckets
            .entry(granularity.truncate(event.created_at))
            .or_default();
        acc.visitors.insert(event.visitor_id.as_str());
        if event.event_type.is_pageview() {
            acc.pageviews += 1;
        }
    }

    buckets
        .into_iter()
        .map(|(start, acc)| TimeBucket {
            bucket: start.format(granularity.format_str()).to_string(),
            visitors: count(acc.visitors.len()),
            pageviews: acc.pageviews,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::testutil::{at, event, pageview};

    #[test]
    fn test_daily_buckets() {
        let window = TimeWindow::new(at(0), at(3 * 86_400 - 1)).unwrap();
        let events = vec![
            pageview("s1", "v1", "/", 10 * 3600),
            pageview("s1", "v1", "/a", 14 * 3600),
            pageview("s2", "v2", "/", 86_400 + 10 * 3600),
        ];

        let buckets = visitor_timeseries(&events, &window, Granularity::Day);

        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].bucket, "2024-01-15");
        assert_eq!(buckets[0].pageviews, 2);
        assert_eq!(buckets[0].visitors, 1);
        assert_eq!(buckets[1].bucket, "2024-01-16");
        assert_eq!(buckets[1].pageviews, 1);
        assert_eq!(buckets[2].bucket, "2024-01-17");
        assert_eq!(buckets[2].pageviews, 0);
    }

    #[test]
    fn test_hourly_buckets() {
        let window = TimeWindow::new(at(10 * 3600), at(15 * 3600 - 1)).unwrap();
        let events = vec![
            pageview("s1", "v1", "/", 10 * 3600),
            pageview("s2", "v2", "/", 10 * 3600 + 1800),
            event("s2", "v2", "conversion", "/", 14 * 3600),
        ];

        let buckets = visitor_timeseries(&events, &window, Granularity::Hour);

        assert_eq!(buckets.len(), 5);
        assert_eq!(buckets[0].bucket, "2024-01-15 10:00");
        assert_eq!(buckets[0].visitors, 2);
        assert_eq!(buckets[0].pageviews, 2);
        assert_eq!(buckets[4].bucket, "2024-01-15 14:00");
        assert_eq!(buckets[4].visitors, 1);
        assert_eq!(buckets[4].pageviews, 0);
    }

    #[test]
    fn test_events_outside_window_ignored() {
        let window = TimeWindow::new(at(0), at(3599)).unwrap();
        let events = vec![pageview("s1", "v1", "/", 7200)];
        let buckets = visitor_timeseries(&events, &window, Granularity::Hour);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].pageviews, 0);
    }

    #[test]
    fn test_granularity_for_window() {
        let day = TimeWindow::new(at(0), at(86_400)).unwrap();
        let month = TimeWindow::new(at(0), at(30 * 86_400)).unwrap();
        assert_eq!(Granularity::for_window(&day), Granularity::Hour);
        assert_eq!(Granularity::for_window(&month), Granularity::Day);
    }
}
