//! Backup importer: the destructive inverse of the exporter.
//!
//! The failure window is bounded by ordering: the archive is unpacked and
//! *every* manifest parsed before the live store or blob root is touched. A
//! bad file fails fast with `InvalidArchive` and the app is untouched; a
//! failure after the wipe surfaces as `PartialRestore` and is never silently
//! retried.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::archive;
use crate::blobs::BlobStore;
use crate::config::{APP_NAME, AppConfig};
use crate::db::{self, DbPool};
use crate::errors::{Error, Result};
use crate::models::{
    BackupMeta, Canvas, CanvasPayload, Client, Expense, Note, Product, Quotation, RentalDetail,
    SavedReport, Section, Transaction, TransactionKind,
};

use super::export::reset_staging;

/// Restores the store and blob root from a backup archive chosen by the
/// user.
///
/// # Errors
///
/// Returns `Error::InvalidArchive` (live data untouched) when the file is
/// not a recognizable backup, and `Error::PartialRestore` when a failure
/// happens after the destructive wipe has begun.
#[instrument(skip(pool, blobs, config, archive_path))]
pub async fn import_backup(
    pool: &DbPool,
    blobs: &BlobStore,
    config: &AppConfig,
    archive_path: &Path,
) -> Result<()> {
    let staging = config.import_staging_dir();
    reset_staging(&staging).await?;
    archive::unpack(archive_path, &staging).await?;

    // The meta manifest gates everything destructive. No meta, wrong app:
    // refuse before a single row is deleted.
    let meta = read_meta(&staging).await?;
    info!(
        "Importing backup of {} v{} from {}",
        meta.app_name, meta.version, meta.export_date
    );

    // Parse every manifest up front. Kinds added in later schema versions
    // may be absent from old archives: absent means empty, never an error.
    let sections: Vec<Section> =
        read_manifest(&staging, &["data/sections.json", "data/folders.json"]).await?;
    let products: Vec<Product> = read_manifest(&staging, &["data/products.json"]).await?;
    let canvases: Vec<Canvas> = read_manifest(&staging, &["data/canvases.json"]).await?;
    let transactions: Vec<Transaction> =
        read_manifest(&staging, &["data/transactions.json"]).await?;
    let rentals: Vec<RentalDetail> = read_manifest(&staging, &["data/rentals.json"]).await?;
    let decorations: Vec<RentalDetail> =
        read_manifest(&staging, &["data/decorations.json"]).await?;
    let expenses: Vec<Expense> = read_manifest(&staging, &["data/expenses.json"]).await?;
    let saved_reports: Vec<SavedReport> =
        read_manifest(&staging, &["data/saved_reports.json"]).await?;
    let clients: Vec<Client> = read_manifest(&staging, &["data/clients.json"]).await?;
    let quotations: Vec<Quotation> = read_manifest(&staging, &["data/quotations.json"]).await?;
    let notes: Vec<Note> = read_manifest(&staging, &["data/notes.json"]).await?;
    let settings: BTreeMap<String, String> = match read_optional(&staging, "settings.json").await? {
        Some(map) => map,
        None => BTreeMap::new(),
    };

    info!("Archive parsed. Wiping live data for restore...");

    // Destructive boundary. Everything below runs under PartialRestore
    // semantics: the old data is gone, the only way out is forward.
    let restore = async {
        db::wipe_all(pool).await?;
        blobs.wipe().await?;

        for (key, value) in &settings {
            db::settings::set_setting(pool, key, value).await?;
        }

        for mut section in sections {
            section.image = restore_reference(blobs, &staging, section.image.take()).await?;
            db::sections::insert_section(pool, &section).await?;
        }
        for mut product in products {
            product.image = restore_reference(blobs, &staging, product.image.take()).await?;
            product.image_secondary1 =
                restore_reference(blobs, &staging, product.image_secondary1.take()).await?;
            product.image_secondary2 =
                restore_reference(blobs, &staging, product.image_secondary2.take()).await?;
            db::products::insert_product(pool, &product).await?;
        }
        for mut canvas in canvases {
            canvas.thumbnail = restore_reference(blobs, &staging, canvas.thumbnail.take()).await?;
            let mut payload = CanvasPayload::parse(&canvas.data)?;
            for image in &mut payload.images {
                image.source = restore_reference(blobs, &staging, image.source.take()).await?;
            }
            canvas.data = payload.to_json()?;
            db::canvases::insert_canvas(pool, &canvas).await?;
        }
        for transaction in &transactions {
            db::transactions::insert_transaction(pool, transaction).await?;
        }
        for detail in &rentals {
            db::transactions::insert_detail(pool, TransactionKind::Rental, detail).await?;
        }
        for detail in &decorations {
            db::transactions::insert_detail(pool, TransactionKind::Decoration, detail).await?;
        }
        for mut expense in expenses {
            expense.receipt_image =
                restore_reference(blobs, &staging, expense.receipt_image.take()).await?;
            db::expenses::insert_expense(pool, &expense).await?;
        }
        for report in &saved_reports {
            db::saved_reports::insert_saved_report(pool, report).await?;
        }
        for client in &clients {
            db::clients::insert_client(pool, client).await?;
        }
        for quotation in &quotations {
            db::quotations::insert_quotation(pool, quotation).await?;
        }
        for note in &notes {
            db::notes::insert_note(pool, note).await?;
        }
        Ok::<(), Error>(())
    };
    restore.await.map_err(|e| match e {
        already @ Error::PartialRestore(_) => already,
        other => Error::PartialRestore(other.to_string()),
    })?;

    if let Err(e) = fs::remove_dir_all(&staging).await {
        warn!("Failed to clean import staging directory: {}", e);
    }
    info!("Backup restored.");
    Ok(())
}

async fn read_meta(staging: &Path) -> Result<BackupMeta> {
    let path = staging.join("meta.json");
    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::InvalidArchive("no meta.json at archive root".to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let meta: BackupMeta = serde_json::from_slice(&bytes)
        .map_err(|e| Error::InvalidArchive(format!("malformed meta.json: {e}")))?;
    if meta.app_name != APP_NAME {
        return Err(Error::InvalidArchive(format!(
            "archive belongs to '{}', not {APP_NAME}",
            meta.app_name
        )));
    }
    Ok(meta)
}

/// Reads the first manifest that exists out of `names` (the current name
/// first, legacy names after it). All names absent means the kind did not
/// exist when the archive was written: an empty list. A manifest that is
/// present but unparsable is `InvalidArchive`, and since all manifests are
/// read before the wipe, it aborts the import with live data intact.
async fn read_manifest<T: DeserializeOwned>(staging: &Path, names: &[&str]) -> Result<Vec<T>> {
    for name in names {
        let mut path = staging.to_path_buf();
        for part in name.split('/') {
            path.push(part);
        }
        match fs::read(&path).await {
            Ok(bytes) => {
                return serde_json::from_slice(&bytes)
                    .map_err(|e| Error::InvalidArchive(format!("malformed {name}: {e}")));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        }
    }
    debug!("No manifest among {:?}; treating as empty.", names);
    Ok(Vec::new())
}

async fn read_optional<T: DeserializeOwned>(staging: &Path, name: &str) -> Result<Option<T>> {
    match fs::read(staging.join(name)).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::InvalidArchive(format!("malformed {name}: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn restore_reference(
    blobs: &BlobStore,
    staging: &Path,
    reference: Option<String>,
) -> Result<Option<String>> {
    match reference {
        Some(relative) => blobs.restore_from_archive(staging, &relative).await,
        None => Ok(None),
    }
}
