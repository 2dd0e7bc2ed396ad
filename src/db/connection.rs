use crate::db::migrations::run_migrations;
use crate::errors::{Error, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

pub type DbPool = Arc<Mutex<Connection>>;

/// Every table the store owns. Used by [`wipe_all`]; order is irrelevant
/// there because foreign-key enforcement is suspended for the wipe.
pub(crate) const ALL_TABLES: &[&str] = &[
    "settings",
    "rentals",
    "decorations",
    "transactions",
    "products",
    "sections",
    "canvases",
    "expenses",
    "quotations",
    "clients",
    "saved_reports",
    "notes",
];

/// Opens the database and brings the schema up to date.
///
/// Safe to call on every application start: migrations are versioned and
/// idempotent. Any failure here is fatal; callers must not continue with a
/// partially-initialized store.
#[instrument]
pub async fn init_db(db_path: &str) -> Result<DbPool> {
    debug!("Initializing database connection to: {}", db_path);
    let conn = Connection::open(db_path)
        .map_err(|e| Error::Schema(format!("Failed to open database at {db_path}: {e}")))?;

    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")
        .map_err(|e| Error::Schema(format!("Failed to set database pragmas: {e}")))?;

    info!("Database connection opened. Running migrations...");
    run_migrations(&conn)?;

    Ok(Arc::new(Mutex::new(conn)))
}

/// Deletes every row across all entity kinds.
///
/// Foreign-key enforcement is suspended for the duration so deletion order
/// does not matter, then re-enabled best-effort even when a mid-sequence
/// delete failed; the first failure is propagated to the caller.
#[instrument(skip(pool))]
pub async fn wipe_all(pool: &DbPool) -> Result<()> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock for wipe".to_string()))?;

    conn.execute("PRAGMA foreign_keys = OFF;", [])
        .map_err(|e| Error::Database(format!("Failed to suspend foreign keys: {e}")))?;

    let mut wipe_result: Result<()> = Ok(());
    for table in ALL_TABLES {
        if let Err(e) = conn.execute(&format!("DELETE FROM {table}"), []) {
            wipe_result = Err(Error::Database(format!("Failed to wipe '{table}': {e}")));
            break;
        }
    }

    if let Err(e) = conn.execute("PRAGMA foreign_keys = ON;", []) {
        warn!("Failed to re-enable foreign keys after wipe: {}", e);
        if wipe_result.is_ok() {
            wipe_result = Err(Error::Database(format!(
                "Failed to re-enable foreign keys after wipe: {e}"
            )));
        }
    }

    if wipe_result.is_ok() {
        info!("All tables wiped.");
    }
    wipe_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{init_test_tracing, setup_test_db};
    use crate::errors::Result;

    #[tokio::test]
    async fn test_wipe_all_empties_every_table() -> Result<()> {
        init_test_tracing();
        let pool = setup_test_db().await?;
        {
            let conn = pool.lock().unwrap();
            conn.execute(
                "INSERT INTO sections VALUES ('s1', 'Flores', '#f00', 'flower',
                 NULL, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
                [],
            )?;
            conn.execute(
                "INSERT INTO settings (key, value) VALUES ('currency', 'MXN')",
                [],
            )?;
        }

        wipe_all(&pool).await?;

        let conn = pool.lock().unwrap();
        for table in ALL_TABLES {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            assert_eq!(count, 0, "table {table} should be empty after wipe");
        }
        // Enforcement is back on after the wipe.
        let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        assert_eq!(fk, 1);
        Ok(())
    }
}
