//! Backup exporter: serializes the whole relational store plus every
//! referenced image blob into a portable archive.
//!
//! Export is read-only with respect to the live store and blob root; every
//! reference rewrite happens on in-memory copies written into a scratch
//! directory, which is then packed into a single `.tar.gz`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{info, instrument, warn};

use crate::archive;
use crate::blobs::BlobStore;
use crate::config::{APP_NAME, APP_VERSION, AppConfig};
use crate::db::{self, DbPool};
use crate::errors::Result;
use crate::models::{BackupMeta, CanvasPayload, TransactionKind};

/// Exports the entire store as a single shareable archive and returns its
/// path. No partial-success mode: if any step fails, no archive is produced.
#[instrument(skip(pool, blobs, config))]
pub async fn export_backup(pool: &DbPool, blobs: &BlobStore, config: &AppConfig) -> Result<PathBuf> {
    let staging = config.export_staging_dir();
    reset_staging(&staging).await?;
    fs::create_dir_all(staging.join("data")).await?;

    // Read every entity kind fully before touching the filesystem.
    let mut sections = db::sections::list_sections(pool).await?;
    let mut products = db::products::list_products(pool).await?;
    let mut canvases = db::canvases::list_canvases(pool).await?;
    let transactions = db::transactions::list_transactions(pool).await?;
    let rentals = db::transactions::list_details(pool, TransactionKind::Rental).await?;
    let decorations = db::transactions::list_details(pool, TransactionKind::Decoration).await?;
    let mut expenses = db::expenses::list_expenses(pool).await?;
    let saved_reports = db::saved_reports::list_saved_reports(pool).await?;
    let clients = db::clients::list_clients(pool).await?;
    let quotations = db::quotations::list_quotations(pool).await?;
    let notes = db::notes::list_notes(pool).await?;
    let settings = db::settings::get_all_settings(pool).await?;

    // Stage every blob reference and rewrite the in-memory copy to the
    // archive-relative path. A missing file becomes null, not a failure.
    for section in &mut sections {
        section.image = stage_reference(blobs, &staging, "sections", section.image.take()).await?;
    }
    for product in &mut products {
        product.image = stage_reference(blobs, &staging, "products", product.image.take()).await?;
        product.image_secondary1 =
            stage_reference(blobs, &staging, "products", product.image_secondary1.take()).await?;
        product.image_secondary2 =
            stage_reference(blobs, &staging, "products", product.image_secondary2.take()).await?;
    }
    for canvas in &mut canvases {
        canvas.thumbnail =
            stage_reference(blobs, &staging, "canvases", canvas.thumbnail.take()).await?;
        let mut payload = CanvasPayload::parse(&canvas.data)?;
        for image in &mut payload.images {
            image.source =
                stage_reference(blobs, &staging, "canvases_content", image.source.take()).await?;
        }
        canvas.data = payload.to_json()?;
    }
    for expense in &mut expenses {
        expense.receipt_image =
            stage_reference(blobs, &staging, "expenses", expense.receipt_image.take()).await?;
    }

    write_manifest(&staging, "data/sections.json", &sections).await?;
    write_manifest(&staging, "data/products.json", &products).await?;
    write_manifest(&staging, "data/canvases.json", &canvases).await?;
    write_manifest(&staging, "data/transactions.json", &transactions).await?;
    write_manifest(&staging, "data/rentals.json", &rentals).await?;
    write_manifest(&staging, "data/decorations.json", &decorations).await?;
    write_manifest(&staging, "data/expenses.json", &expenses).await?;
    write_manifest(&staging, "data/saved_reports.json", &saved_reports).await?;
    write_manifest(&staging, "data/clients.json", &clients).await?;
    write_manifest(&staging, "data/quotations.json", &quotations).await?;
    write_manifest(&staging, "data/notes.json", &notes).await?;
    write_manifest(&staging, "settings.json", &settings).await?;

    let counts: BTreeMap<String, usize> = [
        ("sections", sections.len()),
        ("products", products.len()),
        ("canvases", canvases.len()),
        ("transactions", transactions.len()),
        ("rentals", rentals.len()),
        ("decorations", decorations.len()),
        ("expenses", expenses.len()),
        ("savedReports", saved_reports.len()),
        ("clients", clients.len()),
        ("quotations", quotations.len()),
        ("notes", notes.len()),
        ("settings", settings.len()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    let meta = BackupMeta {
        app_name: APP_NAME.to_string(),
        version: APP_VERSION.to_string(),
        export_date: Utc::now(),
        counts,
    };
    write_manifest(&staging, "meta.json", &meta).await?;

    // Local date stamp so a folder of backups sorts the way people expect.
    let archive_name = format!(
        "decor-ledger-backup-{}.tar.gz",
        Local::now().format("%Y-%m-%d-%H%M%S")
    );
    fs::create_dir_all(config.backups_dir()).await?;
    let archive_path = config.backups_dir().join(archive_name);
    archive::pack(&staging, &archive_path).await?;

    if let Err(e) = fs::remove_dir_all(&staging).await {
        warn!("Failed to clean export staging directory: {}", e);
    }

    info!("Backup exported to {}", archive_path.display());
    Ok(archive_path)
}

async fn stage_reference(
    blobs: &BlobStore,
    staging: &Path,
    kind_dir: &str,
    reference: Option<String>,
) -> Result<Option<String>> {
    match reference {
        Some(path) => blobs.stage_for_export(&path, staging, kind_dir).await,
        None => Ok(None),
    }
}

pub(crate) async fn write_manifest<T: Serialize>(
    staging: &Path,
    relative: &str,
    value: &T,
) -> Result<()> {
    let mut path = staging.to_path_buf();
    for part in relative.split('/') {
        path.push(part);
    }
    let json = serde_json::to_vec_pretty(value)?;
    fs::write(&path, json).await?;
    Ok(())
}

/// Clears and recreates a scratch directory, including leftovers from a
/// previously failed run.
pub(crate) async fn reset_staging(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::create_dir_all(dir).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::products::NewProduct;
    use crate::db::test_utils::{init_test_tracing, setup_test_db};
    use crate::errors::Result;
    use crate::models::Section;

    async fn setup_env() -> Result<(tempfile::TempDir, AppConfig, DbPool, BlobStore)> {
        init_test_tracing();
        let tmp = tempfile::tempdir().unwrap();
        let config = AppConfig {
            database_path: ":memory:".to_string(),
            data_dir: tmp.path().to_path_buf(),
        };
        let pool = setup_test_db().await?;
        let blobs = BlobStore::new(config.images_dir());
        blobs.init().await?;
        Ok((tmp, config, pool, blobs))
    }

    #[tokio::test]
    async fn test_export_writes_manifests_meta_and_blobs() -> Result<()> {
        let (tmp, config, pool, blobs) = setup_env().await?;

        let source = tmp.path().join("silla.jpg");
        fs::write(&source, b"sillabytes").await?;
        let internal = blobs.copy_to_internal(source.to_str().unwrap()).await?;

        let section =
            db::sections::add_section(&pool, "Mobiliario", "#8e44ad", "chair", None).await?;
        db::products::add_product(
            &pool,
            &NewProduct {
                section_id: section.id.clone(),
                name: "Silla Tiffany".to_string(),
                price: 25.0,
                image: Some(internal),
                ..NewProduct::default()
            },
        )
        .await?;
        db::settings::set_setting(&pool, "currency", "MXN").await?;

        let archive_path = export_backup(&pool, &blobs, &config).await?;
        assert!(archive_path.exists());

        // Unpack and inspect the logical content.
        let out = tmp.path().join("inspect");
        crate::archive::unpack(&archive_path, &out).await?;

        let meta: BackupMeta =
            serde_json::from_slice(&std::fs::read(out.join("meta.json")).unwrap())?;
        assert_eq!(meta.app_name, APP_NAME);
        assert_eq!(meta.counts.get("sections"), Some(&1));
        assert_eq!(meta.counts.get("products"), Some(&1));

        let products: Vec<crate::models::Product> =
            serde_json::from_slice(&std::fs::read(out.join("data/products.json")).unwrap())?;
        let staged = products[0].image.as_deref().expect("image staged");
        assert!(staged.starts_with("images/products/"));
        assert_eq!(std::fs::read(out.join(staged)).unwrap(), b"sillabytes");

        let settings: BTreeMap<String, String> =
            serde_json::from_slice(&std::fs::read(out.join("settings.json")).unwrap())?;
        assert_eq!(settings.get("currency").map(String::as_str), Some("MXN"));
        Ok(())
    }

    #[tokio::test]
    async fn test_export_nulls_missing_image_instead_of_failing() -> Result<()> {
        let (tmp, config, pool, blobs) = setup_env().await?;

        // Reference a file that does not exist on disk.
        let ghost = config.images_dir().join("gone.jpg");
        let section = Section {
            image: Some(ghost.to_string_lossy().into_owned()),
            ..db::sections::add_section(&pool, "Telas", "#3498db", "fabric", None).await?
        };
        db::sections::update_section(&pool, &section).await?;

        let archive_path = export_backup(&pool, &blobs, &config).await?;

        let out = tmp.path().join("inspect");
        crate::archive::unpack(&archive_path, &out).await?;
        let sections: Vec<Section> =
            serde_json::from_slice(&std::fs::read(out.join("data/sections.json")).unwrap())?;
        assert_eq!(sections.len(), 1);
        assert!(
            sections[0].image.is_none(),
            "missing blob must export as null, not abort the backup"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_export_twice_has_equal_logical_content() -> Result<()> {
        let (tmp, config, pool, blobs) = setup_env().await?;

        let source = tmp.path().join("flor.png");
        fs::write(&source, b"florbytes").await?;
        let internal = blobs.copy_to_internal(source.to_str().unwrap()).await?;
        let section =
            db::sections::add_section(&pool, "Flores", "#e74c3c", "flower", Some(internal)).await?;
        assert!(section.image.is_some());

        let first = export_backup(&pool, &blobs, &config).await?;
        let out_a = tmp.path().join("a");
        crate::archive::unpack(&first, &out_a).await?;

        let second = export_backup(&pool, &blobs, &config).await?;
        let out_b = tmp.path().join("b");
        crate::archive::unpack(&second, &out_b).await?;

        assert_eq!(
            std::fs::read(out_a.join("data/sections.json")).unwrap(),
            std::fs::read(out_b.join("data/sections.json")).unwrap(),
            "manifests must be identical when nothing changed"
        );
        Ok(())
    }
}
