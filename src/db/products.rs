use crate::blobs::BlobStore;
use crate::db::DbPool;
use crate::errors::{Error, Result};
use crate::ids::new_record_id;
use crate::models::Product;
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info, instrument};

/// Arguments for creating a product.
#[derive(Debug, Clone, Default)]
pub struct NewProduct {
    pub section_id: String,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub rent_price: f64,
    /// Blob-store paths; up to three images per product.
    pub image: Option<String>,
    pub image_secondary1: Option<String>,
    pub image_secondary2: Option<String>,
}

fn row_to_product(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        section_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        price: row.get(4)?,
        rent_price: row.get(5)?,
        image: row.get(6)?,
        image_secondary1: row.get(7)?,
        image_secondary2: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const PRODUCT_COLUMNS: &str = "id, section_id, name, description, price, rent_price,
         image, image_secondary1, image_secondary2, created_at, updated_at";

/// Creates a new product inside a section.
///
/// # Returns
///
/// Returns the fully-populated [`Product`], including its generated id.
///
/// # Errors
///
/// Returns `Error::Database` if the price or rent price is negative, if the
/// section does not exist (foreign-key violation), if there's an issue
/// acquiring the database lock, or on any other insert failure.
#[instrument(skip(pool, args))]
pub async fn add_product(pool: &DbPool, args: &NewProduct) -> Result<Product> {
    if args.price < 0.0 || args.rent_price < 0.0 {
        return Err(Error::Database(
            "Product price cannot be negative.".to_string(),
        ));
    }
    let now = Utc::now();
    let product = Product {
        id: new_record_id(),
        section_id: args.section_id.clone(),
        name: args.name.clone(),
        description: args.description.clone(),
        price: args.price,
        rent_price: args.rent_price,
        image: args.image.clone(),
        image_secondary1: args.image_secondary1.clone(),
        image_secondary2: args.image_secondary2.clone(),
        created_at: now,
        updated_at: now,
    };
    insert_product(pool, &product).await?;
    info!(
        "Added product '{}' (id: {}) in section {}",
        product.name, product.id, product.section_id
    );
    Ok(product)
}

/// Inserts a product row as-is, preserving its id and timestamps. Used by
/// [`add_product`] and by the backup importer.
#[instrument(skip(pool, product))]
pub async fn insert_product(pool: &DbPool, product: &Product) -> Result<()> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock for adding product".to_string()))?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO products (id, section_id, name, description, price, rent_price,
                               image, image_secondary1, image_secondary2, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    stmt.insert(params![
        product.id,
        product.section_id,
        product.name,
        product.description,
        product.price,
        product.rent_price,
        product.image,
        product.image_secondary1,
        product.image_secondary2,
        product.created_at,
        product.updated_at,
    ])?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_product(pool: &DbPool, id: &str) -> Result<Option<Product>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"
    ))?;
    let product = stmt.query_row(params![id], row_to_product).optional()?;
    debug!("Product lookup '{}': found={}", id, product.is_some());
    Ok(product)
}

/// Lists all products, ordered by name.
#[instrument(skip(pool))]
pub async fn list_products(pool: &DbPool) -> Result<Vec<Product>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY name ASC"
    ))?;
    let iter = stmt.query_map([], row_to_product)?;
    let mut products = Vec::new();
    for product in iter {
        products.push(product.map_err(|e| Error::Database(format!("Failed to map product row: {e}")))?);
    }
    debug!("Fetched {} products.", products.len());
    Ok(products)
}

#[instrument(skip(pool))]
pub async fn list_products_in_section(pool: &DbPool, section_id: &str) -> Result<Vec<Product>> {
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE section_id = ?1 ORDER BY name ASC"
    ))?;
    let iter = stmt.query_map(params![section_id], row_to_product)?;
    let mut products = Vec::new();
    for product in iter {
        products.push(product.map_err(|e| Error::Database(format!("Failed to map product row: {e}")))?);
    }
    Ok(products)
}

/// Updates a product in place, refreshing `updated_at`.
#[instrument(skip(pool, product))]
pub async fn update_product(pool: &DbPool, product: &Product) -> Result<usize> {
    if product.price < 0.0 || product.rent_price < 0.0 {
        return Err(Error::Database(
            "Product price cannot be negative.".to_string(),
        ));
    }
    let conn = pool
        .lock()
        .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
    let rows_affected = conn.execute(
        "UPDATE products SET section_id = ?1, name = ?2, description = ?3, price = ?4,
                rent_price = ?5, image = ?6, image_secondary1 = ?7, image_secondary2 = ?8,
                updated_at = ?9
         WHERE id = ?10",
        params![
            product.section_id,
            product.name,
            product.description,
            product.price,
            product.rent_price,
            product.image,
            product.image_secondary1,
            product.image_secondary2,
            Utc::now(),
            product.id,
        ],
    )?;
    info!("Updated product {} ({} rows)", product.id, rows_affected);
    Ok(rows_affected)
}

/// Deletes a product and discards its image blobs best-effort.
///
/// Row first, blobs second: a crash in between strands blobs for the
/// garbage collector, never a row pointing at nothing.
#[instrument(skip(pool, blobs))]
pub async fn delete_product(pool: &DbPool, blobs: &BlobStore, id: &str) -> Result<usize> {
    let mut image_paths: Vec<String> = Vec::new();
    let rows_affected;
    {
        let conn = pool
            .lock()
            .map_err(|_| Error::Database("Failed to acquire DB lock".to_string()))?;
        let images: Option<[Option<String>; 3]> = conn
            .query_row(
                "SELECT image, image_secondary1, image_secondary2 FROM products WHERE id = ?1",
                params![id],
                |row| Ok([row.get(0)?, row.get(1)?, row.get(2)?]),
            )
            .optional()?;
        if let Some(images) = images {
            image_paths.extend(images.into_iter().flatten());
        }
        rows_affected = conn.execute("DELETE FROM products WHERE id = ?1", params![id])?;
    }

    if rows_affected > 0 {
        for path in &image_paths {
            blobs.discard(path).await;
        }
    }
    info!("Deleted product '{}' ({} rows)", id, rows_affected);
    Ok(rows_affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sections::add_section;
    use crate::db::test_utils::{init_test_tracing, setup_test_db};
    use crate::errors::Result;

    async fn setup_section(pool: &DbPool) -> Result<String> {
        Ok(add_section(pool, "Mobiliario", "#8e44ad", "chair", None)
            .await?
            .id)
    }

    #[tokio::test]
    async fn test_add_and_get_product() -> Result<()> {
        init_test_tracing();
        let pool = setup_test_db().await?;
        let section_id = setup_section(&pool).await?;

        let product = add_product(
            &pool,
            &NewProduct {
                section_id: section_id.clone(),
                name: "Silla Tiffany".to_string(),
                description: Some("Silla para eventos".to_string()),
                price: 25.0,
                rent_price: 5.0,
                ..NewProduct::default()
            },
        )
        .await?;

        let fetched = get_product(&pool, &product.id).await?.unwrap();
        assert_eq!(fetched.name, "Silla Tiffany");
        assert_eq!(fetched.section_id, section_id);
        assert_eq!(fetched.price, 25.0);
        assert_eq!(fetched.rent_price, 5.0);
        assert!(fetched.image.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_add_product_rejects_negative_price() -> Result<()> {
        init_test_tracing();
        let pool = setup_test_db().await?;
        let section_id = setup_section(&pool).await?;

        let result = add_product(
            &pool,
            &NewProduct {
                section_id,
                name: "Mesa".to_string(),
                price: -1.0,
                ..NewProduct::default()
            },
        )
        .await;
        assert!(result.is_err(), "negative price must be rejected");
        Ok(())
    }

    #[tokio::test]
    async fn test_add_product_requires_existing_section() -> Result<()> {
        init_test_tracing();
        let pool = setup_test_db().await?;

        let result = add_product(
            &pool,
            &NewProduct {
                section_id: "no-such-section".to_string(),
                name: "Mantel".to_string(),
                price: 8.0,
                ..NewProduct::default()
            },
        )
        .await;
        assert!(
            result.is_err(),
            "foreign key must reject products without a section"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_list_products_in_section() -> Result<()> {
        init_test_tracing();
        let pool = setup_test_db().await?;
        let section_a = setup_section(&pool).await?;
        let section_b = add_section(&pool, "Luces", "#f39c12", "bulb", None).await?.id;

        for (name, section) in [("Silla", &section_a), ("Mesa", &section_a), ("Serie LED", &section_b)] {
            add_product(
                &pool,
                &NewProduct {
                    section_id: section.clone(),
                    name: name.to_string(),
                    price: 10.0,
                    ..NewProduct::default()
                },
            )
            .await?;
        }

        let in_a = list_products_in_section(&pool, &section_a).await?;
        assert_eq!(in_a.len(), 2);
        assert_eq!(in_a[0].name, "Mesa"); // ordered by name
        assert_eq!(list_products(&pool).await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_product_discards_blobs() -> Result<()> {
        init_test_tracing();
        let pool = setup_test_db().await?;
        let section_id = setup_section(&pool).await?;

        let blob_dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(blob_dir.path().to_path_buf());
        blobs.init().await?;

        // Seed a real blob and reference it from the product.
        let source = blob_dir.path().join("source.jpg");
        tokio::fs::write(&source, b"jpegbytes").await?;
        let internal = blobs.copy_to_internal(source.to_str().unwrap()).await?;

        let product = add_product(
            &pool,
            &NewProduct {
                section_id,
                name: "Arco floral".to_string(),
                price: 120.0,
                image: Some(internal.clone()),
                ..NewProduct::default()
            },
        )
        .await?;

        let rows = delete_product(&pool, &blobs, &product.id).await?;
        assert_eq!(rows, 1);
        assert!(get_product(&pool, &product.id).await?.is_none());
        assert!(!blobs.exists(&internal).await, "blob should be discarded");
        Ok(())
    }
}
