//! Garbage collector: reconciles the live reference set against the blob
//! store's directory listing and deletes whatever nothing points at.
//!
//! Safe to run at startup or on demand. It reads a live snapshot and never
//! holds the store lock across an await; an image added by an operation that
//! starts after the snapshot but before the deletes is the known, accepted
//! race of this design.

use std::collections::HashSet;

use tracing::{debug, info, instrument};

use crate::blobs::{BlobStore, blob_file_name};
use crate::db::{self, DbPool};
use crate::errors::Result;
use crate::models::CanvasPayload;

/// Deletes every blob not referenced by any record, returning how many were
/// removed.
#[instrument(skip(pool, blobs))]
pub async fn collect_orphans(pool: &DbPool, blobs: &BlobStore) -> Result<usize> {
    let used = collect_used_filenames(pool).await?;
    debug!("{} referenced filenames in use.", used.len());
    let deleted = blobs.clean_orphaned(&used).await?;
    info!("Garbage collection removed {} orphaned blob(s).", deleted);
    Ok(deleted)
}

/// Flattens every image reference in the store (section and product images,
/// canvas thumbnails, placed images inside each canvas payload, expense receipts)
/// into a set of filenames for the orphan matcher.
pub async fn collect_used_filenames(pool: &DbPool) -> Result<HashSet<String>> {
    let mut used = HashSet::new();

    for section in db::sections::list_sections(pool).await? {
        remember(&mut used, section.image.as_deref());
    }
    for product in db::products::list_products(pool).await? {
        remember(&mut used, product.image.as_deref());
        remember(&mut used, product.image_secondary1.as_deref());
        remember(&mut used, product.image_secondary2.as_deref());
    }
    for canvas in db::canvases::list_canvases(pool).await? {
        remember(&mut used, canvas.thumbnail.as_deref());
        // References buried in the design payload count too; missing one
        // here would delete an image the canvas still renders.
        let payload = CanvasPayload::parse(&canvas.data)?;
        for image in &payload.images {
            remember(&mut used, image.source.as_deref());
        }
    }
    for expense in db::expenses::list_expenses(pool).await? {
        remember(&mut used, expense.receipt_image.as_deref());
    }

    Ok(used)
}

fn remember(used: &mut HashSet<String>, reference: Option<&str>) {
    if let Some(path) = reference {
        if let Some(name) = blob_file_name(path) {
            used.insert(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::products::NewProduct;
    use crate::db::test_utils::{init_test_tracing, setup_test_db};
    use crate::errors::Result;
    use crate::models::{CanvasSettings, PlacedImage};
    use tokio::fs;

    async fn setup_env() -> Result<(tempfile::TempDir, DbPool, BlobStore)> {
        init_test_tracing();
        let tmp = tempfile::tempdir().unwrap();
        let pool = setup_test_db().await?;
        let blobs = BlobStore::new(tmp.path().join("images"));
        blobs.init().await?;
        Ok((tmp, pool, blobs))
    }

    async fn seed_blob(tmp: &tempfile::TempDir, blobs: &BlobStore, name: &str) -> Result<String> {
        let source = tmp.path().join(name);
        fs::write(&source, name.as_bytes()).await?;
        blobs.copy_to_internal(source.to_str().unwrap()).await
    }

    #[tokio::test]
    async fn test_deleted_product_image_is_collected_and_live_one_kept() -> Result<()> {
        let (tmp, pool, blobs) = setup_env().await?;

        let image_x = seed_blob(&tmp, &blobs, "x.jpg").await?;
        let image_y = seed_blob(&tmp, &blobs, "y.jpg").await?;

        let section = db::sections::add_section(&pool, "Luces", "#f39c12", "bulb", None).await?;
        let doomed = db::products::add_product(
            &pool,
            &NewProduct {
                section_id: section.id.clone(),
                name: "Serie vieja".to_string(),
                price: 5.0,
                image: Some(image_x.clone()),
                ..NewProduct::default()
            },
        )
        .await?;
        db::products::add_product(
            &pool,
            &NewProduct {
                section_id: section.id.clone(),
                name: "Serie nueva".to_string(),
                price: 9.0,
                image: Some(image_y.clone()),
                ..NewProduct::default()
            },
        )
        .await?;

        // Delete the row only, leaving the blob stranded for the collector.
        {
            let conn = pool.lock().unwrap();
            conn.execute("DELETE FROM products WHERE id = ?1", [doomed.id.as_str()])?;
        }

        let deleted = collect_orphans(&pool, &blobs).await?;
        assert_eq!(deleted, 1);
        assert!(!blobs.exists(&image_x).await, "orphaned blob must be gone");
        assert!(blobs.exists(&image_y).await, "referenced blob must survive");

        // Idempotence: nothing left to collect.
        assert_eq!(collect_orphans(&pool, &blobs).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_canvas_payload_references_are_retained() -> Result<()> {
        let (tmp, pool, blobs) = setup_env().await?;

        let embedded = seed_blob(&tmp, &blobs, "embedded.png").await?;
        let payload = CanvasPayload {
            images: vec![PlacedImage {
                id: "pi1".to_string(),
                source: Some(embedded.clone()),
                x: 0.0,
                y: 0.0,
                width: 50.0,
                height: 50.0,
                rotation: 0.0,
                z_index: 0,
            }],
            settings: CanvasSettings::default(),
        };
        db::canvases::add_canvas(&pool, "Fondo", &payload, None).await?;

        let deleted = collect_orphans(&pool, &blobs).await?;
        assert_eq!(deleted, 0);
        assert!(
            blobs.exists(&embedded).await,
            "a blob referenced only inside a canvas payload must never be collected"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_section_cascade_then_gc_leaves_no_trace() -> Result<()> {
        let (tmp, pool, blobs) = setup_env().await?;

        let image = seed_blob(&tmp, &blobs, "arco.jpg").await?;
        let section = db::sections::add_section(&pool, "Globos", "#f1c40f", "balloon", None).await?;
        db::products::add_product(
            &pool,
            &NewProduct {
                section_id: section.id.clone(),
                name: "Arco de globos".to_string(),
                price: 80.0,
                image: Some(image.clone()),
                ..NewProduct::default()
            },
        )
        .await?;

        db::sections::delete_section(&pool, &blobs, &section.id).await?;
        collect_orphans(&pool, &blobs).await?;

        assert!(db::products::list_products(&pool).await?.is_empty());
        assert!(
            !blobs.exists(&image).await,
            "no blob referenced only by the deleted section/products may remain"
        );
        Ok(())
    }
}
