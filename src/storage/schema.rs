use duckdb::Connection;

/// SQL statement to create the events table.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS events (
    site_id     VARCHAR NOT NULL,
    session_id  VARCHAR NOT NULL,
    visitor_id  VARCHAR NOT NULL,
    event_type  VARCHAR NOT NULL,
    url         VARCHAR NOT NULL,
    referrer    VARCHAR,
    page_path   VARCHAR,
    created_at  TIMESTAMP NOT NULL,
    properties  VARCHAR
)
";

/// Index backing the per-site time range scan.
pub const CREATE_SITE_TIME_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_events_site_created ON events (site_id, created_at)";

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), duckdb::Error> {
    conn.execute_batch(CREATE_EVENTS_TABLE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        // Verify table exists by querying it
        let mut stmt = conn.prepare("SELECT COUNT(*) FROM events").unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_init_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // Should not error
    }

    #[test]
    fn test_schema_columns() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO events (site_id, session_id, visitor_id, event_type, url,
             referrer, page_path, created_at, properties)
             VALUES (?, ?, ?, ?, ?, ?, ?, CAST(? AS TIMESTAMP), ?)",
            duckdb::params![
                "example.com",
                "sess-1",
                "visitor-1",
                "pageview",
                "https://example.com/pricing",
                "https://www.google.com/",
                "/pricing",
                "2024-01-15 10:30:00",
                r#"{"plan":"pro"}"#,
            ],
        )
        .unwrap();

        let mut stmt = conn.prepare("SELECT COUNT(*) FROM events").unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 1);
    }
}
