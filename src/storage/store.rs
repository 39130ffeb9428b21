use crate::aggregate::{Event, EventStore, EventType, StoreError, TimeWindow};
use chrono::{DateTime, Utc};
use duckdb::Connection;
use parking_lot::Mutex;
use std::sync::Arc;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Event store backed by the DuckDB `events` table.
///
/// Cloning shares the underlying connection.
#[derive(Clone)]
pub struct DuckDbEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbEventStore {
    pub const fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Returns a reference to the DuckDB connection.
    pub const fn conn(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    /// Append events in a single transaction. Returns the number written.
    pub fn append(&self, events: &[Event]) -> Result<usize, StoreError> {
        if events.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO events (site_id, session_id, visitor_id, event_type, url,
                 referrer, page_path, created_at, properties)
                 VALUES (?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP), ?)",
            )?;
            for event in events {
                let properties = if event.properties.is_empty() {
                    None
                } else {
                    Some(serde_json::Value::Object(event.properties.clone()).to_string())
                };
                stmt.execute(duckdb::params![
                    event.site_id,
                    event.session_id,
                    event.visitor_id,
                    event.event_type.as_str(),
                    event.url,
                    event.referrer_url,
                    event.page_path,
                    event.created_at.format(TIMESTAMP_FORMAT).to_string(),
                    properties,
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }
}

impl EventStore for DuckDbEventStore {
    async fn fetch_events(
        &self,
        site_id: &str,
        window: TimeWindow,
    ) -> Result<Vec<Event>, StoreError> {
        let conn = Arc::clone(&self.conn);
        let site_id = site_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            query_events(&conn, &site_id, window)
        })
        .await
        .map_err(|e| StoreError::Task(format!("Query task panicked: {e}")))?
    }
}

/// Raw row as read from DuckDB, before decoding.
struct EventRow {
    site_id: String,
    session_id: String,
    visitor_id: String,
    event_type: String,
    url: String,
    referrer: Option<String>,
    page_path: Option<String>,
    created_ms: i64,
    properties: Option<String>,
}

/// Query the events of one site with `created_at` in `[start, end]`.
///
/// Rows with an unrepresentable timestamp are skipped; an unparseable
/// property bag is read as empty.
pub fn query_events(
    conn: &Connection,
    site_id: &str,
    window: TimeWindow,
) -> Result<Vec<Event>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT site_id, session_id, visitor_id, event_type, url, referrer, page_path,
                epoch_ms(created_at) AS created_ms, properties
         FROM events
         WHERE site_id = ?
           AND created_at >= CAST(? AS TIMESTAMP)
           AND created_at <= CAST(? AS TIMESTAMP)
         ORDER BY created_at",
    )?;
    let rows = stmt
        .query_map(
            duckdb::params![
                site_id,
                window.start.format(TIMESTAMP_FORMAT).to_string(),
                window.end.format(TIMESTAMP_FORMAT).to_string(),
            ],
            |row| {
                Ok(EventRow {
                    site_id: row.get(0)?,
                    session_id: row.get(1)?,
                    visitor_id: row.get(2)?,
                    event_type: row.get(3)?,
                    url: row.get(4)?,
                    referrer: row.get(5)?,
                    page_path: row.get(6)?,
                    created_ms: row.get(7)?,
                    properties: row.get(8)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows.into_iter().filter_map(decode_row).collect())
}

fn decode_row(row: EventRow) -> Option<Event> {
    let Some(created_at) = DateTime::<Utc>::from_timestamp_millis(row.created_ms) else {
        tracing::warn!(
            session_id = %row.session_id,
            created_ms = row.created_ms,
            "Skipping event with invalid timestamp"
        );
        return None;
    };
    let properties = row
        .properties
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    Some(Event {
        site_id: row.site_id,
        session_id: row.session_id,
        visitor_id: row.visitor_id,
        event_type: EventType::from(row.event_type),
        url: row.url,
        referrer_url: row.referrer,
        page_path: row.page_path,
        created_at,
        properties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn setup_store() -> DuckDbEventStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::storage::migrations::run_migrations(&conn).unwrap();
        DuckDbEventStore::new(Arc::new(Mutex::new(conn)))
    }

    fn make_event(site_id: &str, session_id: &str, minute: u32) -> Event {
        Event {
            site_id: site_id.to_string(),
            session_id: session_id.to_string(),
            visitor_id: format!("visitor-{session_id}"),
            event_type: EventType::Pageview,
            url: "https://example.com/pricing?plan=pro".to_string(),
            referrer_url: Some("https://www.google.com/".to_string()),
            page_path: Some("/pricing".to_string()),
            created_at: Utc.with_ymd_and_hms(2024, 1, 15, 10, minute, 0).unwrap(),
            properties: serde_json::Map::new(),
        }
    }

    fn window(start_minute: u32, end_minute: u32) -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 10, start_minute, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 10, end_minute, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_append_and_query_round_trip() {
        let store = setup_store();
        let mut event = make_event("example.com", "s1", 5);
        event
            .properties
            .insert("plan".to_string(), serde_json::json!("pro"));
        event.event_type = EventType::Custom("signup".to_string());
        store.append(std::slice::from_ref(&event)).unwrap();

        let conn = store.conn().lock();
        let events = query_events(&conn, "example.com", window(0, 30)).unwrap();
        assert_eq!(events, vec![event]);
    }

    #[test]
    fn test_query_window_bounds_inclusive() {
        let store = setup_store();
        store
            .append(&[
                make_event("example.com", "s1", 0),
                make_event("example.com", "s2", 10),
                make_event("example.com", "s3", 20),
                make_event("example.com", "s4", 21),
            ])
            .unwrap();

        let conn = store.conn().lock();
        let events = query_events(&conn, "example.com", window(0, 20)).unwrap();
        let sessions: Vec<_> = events.iter().map(|e| e.session_id.as_str()).collect();
        assert_eq!(sessions, vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn test_query_filters_site() {
        let store = setup_store();
        store
            .append(&[
                make_event("example.com", "s1", 1),
                make_event("other.org", "s2", 1),
            ])
            .unwrap();

        let conn = store.conn().lock();
        let events = query_events(&conn, "other.org", window(0, 59)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].site_id, "other.org");
    }

    #[test]
    fn test_append_empty() {
        let store = setup_store();
        assert_eq!(store.append(&[]).unwrap(), 0);
    }

    #[test]
    fn test_unparseable_properties_read_as_empty() {
        let store = setup_store();
        {
            let conn = store.conn().lock();
            conn.execute(
                "INSERT INTO events (site_id, session_id, visitor_id, event_type, url, created_at, properties)
                 VALUES ('example.com', 's1', 'v1', 'pageview', '/', '2024-01-15 10:05:00', '{broken')",
                [],
            )
            .unwrap();
        }
        let conn = store.conn().lock();
        let events = query_events(&conn, "example.com", window(0, 30)).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].properties.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_events_async() {
        let store = setup_store();
        store
            .append(&[make_event("example.com", "s1", 5)])
            .unwrap();
        let events = store
            .fetch_events("example.com", window(0, 30))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path().as_deref(), Some("/pricing"));
    }
}
