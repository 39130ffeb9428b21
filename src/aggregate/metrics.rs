use super::compare::MetricChanges;
use super::count;
use super::event::Event;
use super::sessions::{group_by_session, Sessions};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Default length of ranked lists.
pub const DEFAULT_LIMIT: usize = 10;

/// Consolidated metrics for one site and window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsResult {
    /// Distinct visitor ids.
    pub visitors: u64,
    /// Distinct session ids.
    pub sessions: u64,
    pub pageviews: u64,
    /// Mean duration in seconds of sessions with a positive duration.
    pub avg_session_duration: f64,
    /// Fraction of sessions that bounced, in `[0, 1]`.
    pub bounce_rate: f64,
    pub top_pages: Vec<PageStats>,
    pub top_referrers: Vec<ReferrerStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<MetricChanges>,
}

impl MetricsResult {
    /// The all-zero result for a window without events.
    pub const fn empty() -> Self {
        Self {
            visitors: 0,
            sessions: 0,
            pageviews: 0,
            avg_session_duration: 0.0,
            bounce_rate: 0.0,
            top_pages: Vec::new(),
            top_referrers: Vec::new(),
            changes: None,
        }
    }
}

/// A ranked page row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageStats {
    pub path: String,
    pub pageviews: u64,
    /// Bounce rate of the sessions that viewed this path.
    pub bounce_rate: f64,
}

/// A ranked referrer row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferrerStats {
    pub domain: String,
    pub visitors: u64,
    /// Share of this domain's visitors with a conversion in a referred session.
    pub conversion_rate: f64,
}

/// Compute every metric for an event list, grouping sessions once.
pub fn compute_metrics(events: &[Event], limit: usize) -> MetricsResult {
    if events.is_empty() {
        return MetricsResult::empty();
    }
    let sessions = group_by_session(events);
    tracing::debug!(
        events = events.len(),
        sessions = sessions.len(),
        "Computing metrics"
    );
    MetricsResult {
        visitors: unique_visitors(events),
        sessions: count(sessions.len()),
        pageviews: pageview_count(events),
        avg_session_duration: avg_session_duration(&sessions),
        bounce_rate: bounce_rate(&sessions),
        top_pages: top_pages(&sessions, limit),
        top_referrers: top_referrers(&sessions, limit),
        changes: None,
    }
}

/// Count distinct visitor ids.
pub fn unique_visitors(events: &[Event]) -> u64 {
    let visitors: HashSet<&str> = events.iter().map(|e| e.visitor_id.as_str()).collect();
    count(visitors.len())
}

/// Count distinct session ids.
pub fn unique_sessions(events: &[Event]) -> u64 {
    let sessions: HashSet<&str> = events.iter().map(|e| e.session_id.as_str()).collect();
    count(sessions.len())
}

/// Count pageview events.
pub fn pageview_count(events: &[Event]) -> u64 {
    count(
        events
            .iter()
            .filter(|e| e.event_type.is_pageview())
            .count(),
    )
}

/// Fraction of sessions consisting of a single pageview. Zero when there are
/// no sessions.
pub fn bounce_rate(sessions: &Sessions<'_>) -> f64 {
    let bounces = sessions.values().filter(|s| s.is_bounce()).count();
    ratio(count(bounces), count(sessions.len()))
}

/// Mean first-to-last duration in seconds over sessions whose duration is
/// strictly positive. Zero when no session qualifies.
pub fn avg_session_duration(sessions: &Sessions<'_>) -> f64 {
    let durations: Vec<f64> = sessions
        .values()
        .filter_map(|s| s.duration_secs())
        .filter(|d| *d > 0.0)
        .collect();
    if durations.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = durations.len() as f64;
    durations.iter().sum::<f64>() / n
}

#[derive(Default)]
struct PageAccumulator {
    pageviews: u64,
    sessions: u64,
    bounces: u64,
}

/// Top pages by pageview count, ties broken by path.
///
/// Pageviews whose path cannot be derived are left out of the ranking.
pub fn top_pages(sessions: &Sessions<'_>, limit: usize) -> Vec<PageStats> {
    let mut pages: HashMap<String, PageAccumulator> = HashMap::new();

    for session in sessions.values() {
        let bounced = session.is_bounce();
        let mut touched: HashSet<String> = HashSet::new();
        for event in session.events.iter().filter(|e| e.event_type.is_pageview()) {
            let Some(path) = event.path() else {
                continue;
            };
            let path = path.into_owned();
            let acc = pages.entry(path.clone()).or_default();
            acc.pageviews += 1;
            if touched.insert(path) {
                acc.sessions += 1;
                if bounced {
                    acc.bounces += 1;
                }
            }
        }
    }

    let mut rows: Vec<PageStats> = pages
        .into_iter()
        .map(|(path, acc)| PageStats {
            path,
            pageviews: acc.pageviews,
            bounce_rate: ratio(acc.bounces, acc.sessions),
        })
        .collect();
    rows.sort_by(|a, b| {
        b.pageviews
            .cmp(&a.pageviews)
            .then_with(|| a.path.cmp(&b.path))
    });
    rows.truncate(limit);
    rows
}

#[derive(Default)]
struct ReferrerAccumulator<'a> {
    visitors: HashSet<&'a str>,
    converted: HashSet<&'a str>,
}

/// Top referrer domains by distinct visitors, ties broken by domain.
///
/// A visitor counts as converted for a domain when the session in which that
/// domain referred them holds a conversion. Unparseable referrers are skipped.
pub fn top_referrers(sessions: &Sessions<'_>, limit: usize) -> Vec<ReferrerStats> {
    let mut domains: HashMap<String, ReferrerAccumulator<'_>> = HashMap::new();

    for session in sessions.values() {
        let converted = session.has_conversion();
        for &event in &session.events {
            let Some(domain) = event.referrer_domain() else {
                continue;
            };
            let acc = domains.entry(domain).or_default();
            acc.visitors.insert(event.visitor_id.as_str());
            if converted {
                acc.converted.insert(event.visitor_id.as_str());
            }
        }
    }

    let mut rows: Vec<ReferrerStats> = domains
        .into_iter()
        .map(|(domain, acc)| ReferrerStats {
            domain,
            visitors: count(acc.visitors.len()),
            conversion_rate: ratio(count(acc.converted.len()), count(acc.visitors.len())),
        })
        .collect();
    rows.sort_by(|a, b| {
        b.visitors
            .cmp(&a.visitors)
            .then_with(|| a.domain.cmp(&b.domain))
    });
    rows.truncate(limit);
    rows
}

/// `part / whole`, or zero when `whole` is zero.
fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let value = part as f64 / whole as f64;
    value
}
