//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the image catalog.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per unique image resource
CREATE TABLE IF NOT EXISTS image_resources (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    file_path TEXT NOT NULL,
    format TEXT NOT NULL,
    source TEXT NOT NULL,
    search_query TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    is_downloaded INTEGER NOT NULL DEFAULT 0,
    download_status TEXT NOT NULL,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_images_status ON image_resources(download_status);
CREATE INDEX IF NOT EXISTS idx_images_source ON image_resources(source);
CREATE INDEX IF NOT EXISTS idx_images_query ON image_resources(search_query);
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
    Ok(())
}
