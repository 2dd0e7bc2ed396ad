use crate::blobs::BlobStore;
use crate::db::DbPool;
use crate::errors::{Error, Result};
use crate::ids::new_record_id;
use crate::models::Section;
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info, instrument};

fn row_to_section(row: &Row<'_>) -> rusqlite::Result<Section> {
    Ok(Section {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        icon: row.get(3)?,
        image: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Creates a new catalog section.
///
/// # Parameters
///
/// * `pool`: The database connection pool.
/// * `name`: Display name of the section.
/// * `color`: Hex color used by the catalog UI.
/// * `icon`: Icon identifier used by the catalog UI.
/// * `image`: Optional blob-store path of the section's cover image.
///
/// # Returns
///
/// Returns the fully-populated [`Section`], including its generated id.
///
/// # Errors
///
/// Returns `Error::Database` if there's an issue acquiring the database lock
/// or executing the insert statement.
#[instrument(skip(pool))]
pub async fn add_section(
    pool: &DbPool,
    name: &str,
    color: &str,
    icon: &str,
    image: Option<String>,
) -> Result<Section> {
    let now = Utc::now();
    let section = Section {
        id: new_record_id(),
        name: name.to_string(),
        color: color.to_string(),
        icon: icon.to_string(),
        image,
        created_at: now,
        updated_at: now,
    };
    insert_section(pool, &section).await?;
    info!("Added section '{}' (id: {})", section.name, section.id);
    Ok(section)
}

/// Inserts a section row as-is, preserving its id and timestamps. Used by
/// [`add_section`] and by the backup importer.
#[instrument(skip(pool, section))]
pub async fn insert_section(pool: &DbPool, section: &Section) -> Result<()> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock for adding section".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO sections (id, name, color, icon, image, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    stmt.insert(params![
        section.id,
        section.name,
        section.color,
        section.icon,
        section.image,
        section.created_at,
        section.updated_at,
    ])?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_section(pool: &DbPool, id: &str) -> Result<Option<Section>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, color, icon, image, created_at, updated_at
         FROM sections WHERE id = ?1",
    )?;
    let section = stmt.query_row(params![id], row_to_section).optional()?;
    debug!("Section lookup '{}': found={}", id, section.is_some());
    Ok(section)
}

/// Lists all sections, ordered by name.
#[instrument(skip(pool))]
pub async fn list_sections(pool: &DbPool) -> Result<Vec<Section>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, color, icon, image, created_at, updated_at
         FROM sections ORDER BY name ASC",
    )?;
    let iter = stmt.query_map([], row_to_section)?;
    let mut sections = Vec::new();
    for section in iter {
        sections.push(section.map_err(|e| Error::Database(format!("Failed to map section row: {e}")))?);
    }
    debug!("Fetched {} sections.", sections.len());
    Ok(sections)
}

/// Lists sections together with how many products each one holds.
///
/// The count is computed in the query itself (LEFT JOIN + GROUP BY) so the
/// catalog overview doesn't issue one count query per section.
#[instrument(skip(pool))]
pub async fn list_sections_with_product_counts(pool: &DbPool) -> Result<Vec<(Section, i64)>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "SELECT s.id, s.name, s.color, s.icon, s.image, s.created_at, s.updated_at,
                COUNT(p.id) AS product_count
         FROM sections s
         LEFT JOIN products p ON p.section_id = s.id
         GROUP BY s.id
         ORDER BY s.name ASC",
    )?;
    let iter = stmt.query_map([], |row| Ok((row_to_section(row)?, row.get::<_, i64>(7)?)))?;
    let mut sections = Vec::new();
    for entry in iter {
        sections.push(entry.map_err(|e| Error::Database(format!("Failed to map section row: {e}")))?);
    }
    Ok(sections)
}

/// Updates a section in place, refreshing `updated_at`.
///
/// # Returns
///
/// Returns the number of rows affected (0 if the id does not exist).
#[instrument(skip(pool, section))]
pub async fn update_section(pool: &DbPool, section: &Section) -> Result<usize> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows_affected = conn.execute(
        "UPDATE sections SET name = ?1, color = ?2, icon = ?3, image = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            section.name,
            section.color,
            section.icon,
            section.image,
            Utc::now(),
            section.id,
        ],
    )?;
    info!("Updated section {} ({} rows)", section.id, rows_affected);
    Ok(rows_affected)
}

/// Deletes a section, its products (via cascade), and their image blobs.
///
/// The blob references are collected first, then the section row is deleted
/// (SQLite's ON DELETE CASCADE removes the products atomically with it), and
/// only then are the blobs discarded best-effort. A crash between the two
/// steps strands blobs, never dangling rows; the garbage collector reclaims
/// strays on its next pass.
#[instrument(skip(pool, blobs))]
pub async fn delete_section(pool: &DbPool, blobs: &BlobStore, id: &str) -> Result<usize> {
    let mut image_paths: Vec<String> = Vec::new();
    let rows_affected;
    {
        let conn = pool
            .lock()
            .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;

        let mut stmt = conn.prepare_cached(
            "SELECT image, image_secondary1, image_secondary2
             FROM products WHERE section_id = ?1",
        )?;
        let product_images = stmt.query_map(params![id], |row| {
            Ok([
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ])
        })?;
        for images in product_images {
            let images =
                images.map_err(|e| Error::Database(format!("Failed to map product row: {e}")))?;
            image_paths.extend(images.into_iter().flatten());
        }

        let section_image: Option<Option<String>> = conn
            .query_row("SELECT image FROM sections WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        image_paths.extend(section_image.flatten());

        rows_affected = conn.execute("DELETE FROM sections WHERE id = ?1", params![id])?;
    }

    if rows_affected > 0 {
        for path in &image_paths {
            blobs.discard(path).await;
        }
    }
    info!(
        "Deleted section '{}' ({} rows, {} blobs discarded)",
        id,
        rows_affected,
        image_paths.len()
    );
    Ok(rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{direct_insert_product, init_test_tracing, setup_test_db};
    use crate::errors::Result;

    #[tokio::test]
    async fn test_add_get_update_section() -> Result<()> {
        init_test_tracing();
        let pool = setup_test_db().await?;

        let section = add_section(&pool, "Mobiliario", "#8e44ad", "chair", None).await?;
        let fetched = get_section(&pool, &section.id).await?.unwrap();
        assert_eq!(fetched.name, "Mobiliario");
        assert_eq!(fetched.color, "#8e44ad");
        assert!(fetched.image.is_none());

        let mut updated = fetched.clone();
        updated.name = "Mobiliario y Sillas".to_string();
        let rows = update_section(&pool, &updated).await?;
        assert_eq!(rows, 1);

        let refetched = get_section(&pool, &section.id).await?.unwrap();
        assert_eq!(refetched.name, "Mobiliario y Sillas");
        assert!(
            refetched.updated_at >= refetched.created_at,
            "updated_at should be refreshed on update"
        );

        assert!(get_section(&pool, "missing-id").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_sections_with_product_counts() -> Result<()> {
        init_test_tracing();
        let pool = setup_test_db().await?;

        let flores = add_section(&pool, "Flores", "#e74c3c", "flower", None).await?;
        let telas = add_section(&pool, "Telas", "#3498db", "fabric", None).await?;
        {
            let conn = pool.lock().unwrap();
            direct_insert_product(&conn, "p1", &flores.id, "Rosas", None)?;
            direct_insert_product(&conn, "p2", &flores.id, "Tulipanes", None)?;
        }

        let listed = list_sections_with_product_counts(&pool).await?;
        assert_eq!(listed.len(), 2);
        // Ordered by name: Flores before Telas.
        assert_eq!(listed[0].0.id, flores.id);
        assert_eq!(listed[0].1, 2);
        assert_eq!(listed[1].0.id, telas.id);
        assert_eq!(listed[1].1, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_section_cascades_to_products() -> Result<()> {
        init_test_tracing();
        let pool = setup_test_db().await?;
        let blob_dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(blob_dir.path().to_path_buf());
        blobs.init().await?;

        let section = add_section(&pool, "Globos", "#f1c40f", "balloon", None).await?;
        {
            let conn = pool.lock().unwrap();
            direct_insert_product(&conn, "p1", &section.id, "Arco de globos", None)?;
        }

        let rows = delete_section(&pool, &blobs, &section.id).await?;
        assert_eq!(rows, 1);

        let conn = pool.lock().unwrap();
        let orphan_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM products WHERE section_id = ?1",
            params![section.id],
            |row| row.get(0),
        )?;
        assert_eq!(orphan_count, 0, "cascade must remove dependent products");
        Ok(())
    }
}
