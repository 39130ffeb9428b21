use super::event::Event;
use std::collections::BTreeMap;

/// Events of one session, ordered ascending by `created_at`.
#[derive(Debug, Clone)]
pub struct SessionGroup<'a> {
    pub session_id: &'a str,
    pub events: Vec<&'a Event>,
}

/// Sessions keyed by session id.
pub type Sessions<'a> = BTreeMap<&'a str, SessionGroup<'a>>;

impl<'a> SessionGroup<'a> {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Visitor that owns the session.
    pub fn visitor_id(&self) -> Option<&'a str> {
        self.events.first().map(|e| e.visitor_id.as_str())
    }

    /// A bounce is a session made of a single pageview and nothing else.
    pub fn is_bounce(&self) -> bool {
        matches!(self.events.as_slice(), [only] if only.event_type.is_pageview())
    }

    /// Seconds between the first and last event, or `None` for sessions with
    /// fewer than two events.
    pub fn duration_secs(&self) -> Option<f64> {
        match self.events.as_slice() {
            [first, .., last] => {
                let millis = (last.created_at - first.created_at).num_milliseconds();
                #[allow(clippy::cast_precision_loss)]
                let secs = millis as f64 / 1000.0;
                Some(secs)
            }
            _ => None,
        }
    }

    pub fn has_conversion(&self) -> bool {
        self.events.iter().any(|e| e.event_type.is_conversion())
    }
}

/// Partition events by session id, each group sorted by time.
///
/// Every input event lands in exactly one group. Events sharing a timestamp
/// are ordered by type and URL so the result does not depend on input order.
pub fn group_by_session(events: &[Event]) -> Sessions<'_> {
    let mut sessions: Sessions<'_> = BTreeMap::new();
    for event in events {
        sessions
            .entry(event.session_id.as_str())
            .or_insert_with(|| SessionGroup {
                session_id: event.session_id.as_str(),
                events: Vec::new(),
            })
            .events
            .push(event);
    }
    for group in sessions.values_mut() {
        group.events.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.event_type.as_str().cmp(b.event_type.as_str()))
                .then_with(|| a.url.cmp(&b.url))
                .then_with(|| a.visitor_id.cmp(&b.visitor_id))
                .then_with(|| a.referrer_url.cmp(&b.referrer_url))
                .then_with(|| a.page_path.cmp(&b.page_path))
        });
    }
    sessions
}
