use crate::blobs::BlobStore;
use crate::db::DbPool;
use crate::errors::{Error, Result};
use crate::ids::new_record_id;
use crate::models::{Canvas, CanvasPayload};
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info, instrument};

fn row_to_canvas(row: &Row<'_>) -> rusqlite::Result<Canvas> {
    Ok(Canvas {
        id: row.get(0)?,
        name: row.get(1)?,
        data: row.get(2)?,
        thumbnail: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Creates a new design canvas from a typed payload.
#[instrument(skip(pool, payload))]
pub async fn add_canvas(
    pool: &DbPool,
    name: &str,
    payload: &CanvasPayload,
    thumbnail: Option<String>,
) -> Result<Canvas> {
    let now = Utc::now();
    let canvas = Canvas {
        id: new_record_id(),
        name: name.to_string(),
        data: payload.to_json()?,
        thumbnail,
        created_at: now,
        updated_at: now,
    };
    insert_canvas(pool, &canvas).await?;
    info!("Added canvas '{}' (id: {})", canvas.name, canvas.id);
    Ok(canvas)
}

/// Inserts a canvas row as-is.
///
/// The design payload is validated here, at the store boundary: a canvas
/// whose `data` does not parse as a [`CanvasPayload`] is rejected instead of
/// being persisted opaquely.
#[instrument(skip(pool, canvas))]
pub async fn insert_canvas(pool: &DbPool, canvas: &Canvas) -> Result<()> {
    CanvasPayload::parse(&canvas.data)?;
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock for adding canvas".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO canvases (id, name, data, thumbnail, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    stmt.insert(params![
        canvas.id,
        canvas.name,
        canvas.data,
        canvas.thumbnail,
        canvas.created_at,
        canvas.updated_at,
    ])?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_canvas(pool: &DbPool, id: &str) -> Result<Option<Canvas>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, data, thumbnail, created_at, updated_at FROM canvases WHERE id = ?1",
    )?;
    let canvas = stmt.query_row(params![id], row_to_canvas).optional()?;
    debug!("Canvas lookup '{}': found={}", id, canvas.is_some());
    Ok(canvas)
}

/// Lists all canvases, most recently updated first.
#[instrument(skip(pool))]
pub async fn list_canvases(pool: &DbPool) -> Result<Vec<Canvas>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, data, thumbnail, created_at, updated_at
         FROM canvases ORDER BY updated_at DESC",
    )?;
    let iter = stmt.query_map([], row_to_canvas)?;
    let mut canvases = Vec::new();
    for canvas in iter {
        canvases.push(canvas.map_err(|e| Error::Database(format!("Failed to map canvas row: {e}")))?);
    }
    Ok(canvases)
}

/// Updates a canvas in place, re-validating the payload and refreshing
/// `updated_at`.
#[instrument(skip(pool, canvas))]
pub async fn update_canvas(pool: &DbPool, canvas: &Canvas) -> Result<usize> {
    CanvasPayload::parse(&canvas.data)?;
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows_affected = conn.execute(
        "UPDATE canvases SET name = ?1, data = ?2, thumbnail = ?3, updated_at = ?4 WHERE id = ?5",
        params![canvas.name, canvas.data, canvas.thumbnail, Utc::now(), canvas.id],
    )?;
    info!("Updated canvas {} ({} rows)", canvas.id, rows_affected);
    Ok(rows_affected)
}

/// Deletes a canvas and discards its thumbnail blob.
///
/// Placed-image blobs are left alone: they may be shared with products.
/// The garbage collector reclaims them once nothing references them.
#[instrument(skip(pool, blobs))]
pub async fn delete_canvas(pool: &DbPool, blobs: &BlobStore, id: &str) -> Result<usize> {
    let thumbnail: Option<Option<String>>;
    let rows_affected;
    {
        let conn = pool
            .lock()
            .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
        thumbnail = conn
            .query_row("SELECT thumbnail FROM canvases WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        rows_affected = conn.execute("DELETE FROM canvases WHERE id = ?1", params![id])?;
    }

    if rows_affected > 0 {
        if let Some(Some(path)) = thumbnail {
            blobs.discard(&path).await;
        }
    }
    info!("Deleted canvas '{}' ({} rows)", id, rows_affected);
    Ok(rows_affected)
}
