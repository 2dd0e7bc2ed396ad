#![allow(dead_code)]
use crate::db::{DbPool, migrations};
use crate::errors::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer() // Crucial for `cargo test` output
        .try_init(); // Use try_init to avoid panic if already initialized
}

// Helper to create an in-memory DbPool for testing, with the full schema
// applied the same way init_db applies it.
pub(crate) async fn setup_test_db() -> Result<DbPool> {
    let conn = Connection::open_in_memory()
        .map_err(|e| Error::Database(format!("Test DB: Failed to open in-memory: {e}")))?;
    conn.execute("PRAGMA foreign_keys = ON;", [])
        .map_err(|e| Error::Database(format!("Test DB: Failed to enable foreign keys: {e}")))?;
    migrations::run_migrations(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub(crate) fn test_timestamp() -> DateTime<Utc> {
    "2024-06-15T12:00:00Z".parse().unwrap()
}

// Simplified direct inserts for focused tests that don't want to go through
// the public add_* functions.
pub(crate) fn direct_insert_section(conn: &Connection, id: &str, name: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO sections (id, name, color, icon, image, created_at, updated_at)
         VALUES (?1, ?2, '#cccccc', 'box', NULL, ?3, ?3)",
        params![id, name, test_timestamp()],
    )?;
    Ok(())
}

pub(crate) fn direct_insert_product(
    conn: &Connection,
    id: &str,
    section_id: &str,
    name: &str,
    image: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO products (id, section_id, name, description, price, rent_price,
                               image, image_secondary1, image_secondary2, created_at, updated_at)
         VALUES (?1, ?2, ?3, NULL, 10.0, 0, ?4, NULL, NULL, ?5, ?5)",
        params![id, section_id, name, image, test_timestamp()],
    )?;
    Ok(())
}
