use duckdb::Connection;

const CURRENT_VERSION: u32 = 2;

/// Initialize the schema version tracking table and run any pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), duckdb::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL, applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP)",
    )?;

    let current = get_current_version(conn)?;

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < CURRENT_VERSION {
        tracing::info!(from = current, to = CURRENT_VERSION, "Applied schema migrations");
    }

    Ok(())
}

fn get_current_version(conn: &Connection) -> Result<u32, duckdb::Error> {
    let mut stmt = conn.prepare("SELECT COALESCE(MAX(version), 0) FROM schema_version")?;
    stmt.query_row([], |row| row.get(0))
}

fn migrate_v1(conn: &Connection) -> Result<(), duckdb::Error> {
    // V1: events table
    crate::storage::schema::init_schema(conn)?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [1u32])?;
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<(), duckdb::Error> {
    // V2: (site_id, created_at) index for window scans
    conn.execute_batch(crate::storage::schema::CREATE_SITE_TIME_INDEX)?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [2u32])?;
    Ok(())
}
