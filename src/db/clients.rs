use crate::db::DbPool;
use crate::errors::{Error, Result};
use crate::ids::new_record_id;
use crate::models::Client;
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info, instrument};

fn row_to_client(row: &Row<'_>) -> rusqlite::Result<Client> {
    Ok(Client {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        email: row.get(3)?,
        address: row.get(4)?,
        notes: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[instrument(skip(pool))]
pub async fn add_client(
    pool: &DbPool,
    name: &str,
    phone: Option<String>,
    email: Option<String>,
    address: Option<String>,
    notes: Option<String>,
) -> Result<Client> {
    let now = Utc::now();
    let client = Client {
        id: new_record_id(),
        name: name.to_string(),
        phone,
        email,
        address,
        notes,
        created_at: now,
        updated_at: now,
    };
    insert_client(pool, &client).await?;
    info!("Added client '{}' ({})", client.name, client.id);
    Ok(client)
}

pub async fn insert_client(pool: &DbPool, client: &Client) -> Result<()> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO clients (id, name, phone, email, address, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    stmt.insert(params![
        client.id,
        client.name,
        client.phone,
        client.email,
        client.address,
        client.notes,
        client.created_at,
        client.updated_at,
    ])?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_client(pool: &DbPool, id: &str) -> Result<Option<Client>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, phone, email, address, notes, created_at, updated_at
         FROM clients WHERE id = ?1",
    )?;
    Ok(stmt.query_row(params![id], row_to_client).optional()?)
}

#[instrument(skip(pool))]
pub async fn list_clients(pool: &DbPool) -> Result<Vec<Client>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, phone, email, address, notes, created_at, updated_at
         FROM clients ORDER BY name ASC",
    )?;
    let iter = stmt.query_map([], row_to_client)?;
    let mut clients = Vec::new();
    for client in iter {
        clients.push(client.map_err(|e| Error::Database(format!("Failed to map client row: {e}")))?);
    }
    debug!("Fetched {} clients.", clients.len());
    Ok(clients)
}

#[instrument(skip(pool, client))]
pub async fn update_client(pool: &DbPool, client: &Client) -> Result<usize> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows_affected = conn.execute(
        "UPDATE clients SET name = ?1, phone = ?2, email = ?3, address = ?4, notes = ?5,
                updated_at = ?6
         WHERE id = ?7",
        params![
            client.name,
            client.phone,
            client.email,
            client.address,
            client.notes,
            Utc::now(),
            client.id,
        ],
    )?;
    Ok(rows_affected)
}

#[instrument(skip(pool))]
pub async fn delete_client(pool: &DbPool, id: &str) -> Result<usize> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows_affected = conn.execute("DELETE FROM clients WHERE id = ?1", params![id])?;
    Ok(rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{init_test_tracing, setup_test_db};
    use crate::errors::Result;

    #[tokio::test]
    async fn test_client_crud() -> Result<()> {
        init_test_tracing();
        let pool = setup_test_db().await?;

        let client = add_client(
            &pool,
            "Ana López",
            Some("555-0134".to_string()),
            None,
            None,
            None,
        )
        .await?;
        assert_eq!(list_clients(&pool).await?.len(), 1);

        let mut fetched = get_client(&pool, &client.id).await?.unwrap();
        fetched.email = Some("ana@example.com".to_string());
        assert_eq!(update_client(&pool, &fetched).await?, 1);

        assert_eq!(delete_client(&pool, &client.id).await?, 1);
        assert!(get_client(&pool, &client.id).await?.is_none());
        Ok(())
    }
}
