use crate::db::DbPool;
use crate::errors::{Error, Result};
use rusqlite::{OptionalExtension, params};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Retrieves a value from the key-value `settings` table.
///
/// # Returns
///
/// Returns `Ok(Some(String))` if the key exists, `Ok(None)` otherwise.
///
/// # Errors
///
/// Returns `Error::Database` if there's an issue acquiring the database lock,
/// preparing the SQL statement, or mapping the query result.
#[instrument(skip(pool))]
pub async fn get_setting(pool: &DbPool, key: &str) -> Result<Option<String>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached("SELECT value FROM settings WHERE key = ?1")?;
    let value: Option<String> = stmt.query_row(params![key], |row| row.get(0)).optional()?;
    debug!("Setting '{}': {:?}", key, value);
    Ok(value)
}

/// Sets or updates a value in the key-value `settings` table (UPSERT).
#[instrument(skip(pool))]
pub async fn set_setting(pool: &DbPool, key: &str, value: &str) -> Result<()> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    info!("Set setting: {} = {}", key, value);
    Ok(())
}

/// Returns every setting as an ordered map; the backup exporter serializes
/// this directly into `settings.json`.
#[instrument(skip(pool))]
pub async fn get_all_settings(pool: &DbPool) -> Result<BTreeMap<String, String>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached("SELECT key, value FROM settings ORDER BY key ASC")?;
    let iter = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    let mut settings = BTreeMap::new();
    for entry in iter {
        let (key, value) =
            entry.map_err(|e| Error::Database(format!("Failed to map settings row: {e}")))?;
        settings.insert(key, value);
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{init_test_tracing, setup_test_db};
    use crate::errors::Result;

    #[tokio::test]
    async fn test_set_get_and_upsert() -> Result<()> {
        init_test_tracing();
        let pool = setup_test_db().await?;

        set_setting(&pool, "currency", "MXN").await?;
        assert_eq!(get_setting(&pool, "currency").await?.as_deref(), Some("MXN"));

        set_setting(&pool, "currency", "USD").await?;
        assert_eq!(get_setting(&pool, "currency").await?.as_deref(), Some("USD"));

        assert!(get_setting(&pool, "missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_get_all_settings() -> Result<()> {
        init_test_tracing();
        let pool = setup_test_db().await?;

        set_setting(&pool, "currency", "MXN").await?;
        set_setting(&pool, "business_name", "Eventos Paty").await?;

        let all = get_all_settings(&pool).await?;
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("business_name").map(String::as_str), Some("Eventos Paty"));
        Ok(())
    }
}
