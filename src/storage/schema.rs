//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the frontier database.

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 1;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Companies whose websites are crawled (administered externally)
CREATE TABLE IF NOT EXISTS company_root (
    company_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    root_domain TEXT NOT NULL,
    root_url TEXT NOT NULL UNIQUE,
    crawl_enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

-- Every URL known to a company's frontier
CREATE TABLE IF NOT EXISTS frontier_entry (
    entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES company_root(company_id),
    url TEXT NOT NULL,
    parent_id INTEGER REFERENCES frontier_entry(entry_id),
    parent_url TEXT,
    depth INTEGER NOT NULL CHECK (depth >= 0),
    state TEXT NOT NULL,
    confidence INTEGER CHECK (confidence BETWEEN 0 AND 100),
    discovered_at TEXT NOT NULL,
    last_checked_at TEXT,
    last_error TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    next_attempt_at TEXT,
    UNIQUE(company_id, url),
    CHECK ((parent_id IS NULL AND depth = 0) OR (parent_id IS NOT NULL AND depth > 0))
);

CREATE INDEX IF NOT EXISTS idx_frontier_company_state ON frontier_entry(company_id, state, entry_id);
CREATE INDEX IF NOT EXISTS idx_frontier_state_checked ON frontier_entry(state, last_checked_at);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    if get_schema_version(conn)? == 0 {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

/// Reads the schema version recorded in the database
pub fn get_schema_version(conn: &rusqlite::Connection) -> Result<u32, rusqlite::Error> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}
